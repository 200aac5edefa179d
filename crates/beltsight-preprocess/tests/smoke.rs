use beltsight_camera::{ChannelOrder, Frame};
use beltsight_preprocess::{Filter, Preprocessor, TensorLayout};
use std::time::Duration;

#[test]
fn cpu_smoke() -> anyhow::Result<()> {
    // Fake white 640×480 BGR frame
    let frame = Frame::filled(640, 480, ChannelOrder::Bgr, 255, Duration::ZERO);

    let pp = Preprocessor::new(320, 320, TensorLayout::Nchw)?;
    let out = pp.run(&frame)?;
    assert_eq!(out.shape(), &[1, 3, 320, 320]);
    assert!(out.iter().all(|v| (v - 1.0).abs() < 0.01));
    Ok(())
}

#[test]
fn nhwc_layout_and_filter() -> anyhow::Result<()> {
    let frame = Frame::filled(64, 48, ChannelOrder::Rgb, 0, Duration::ZERO);
    let pp = Preprocessor::new(32, 32, TensorLayout::Nhwc)?.with_filter(Filter::Lanczos3);
    let out = pp.run(&frame)?;
    assert_eq!(out.shape(), &[1, 32, 32, 3]);
    assert!(out.iter().all(|v| *v == 0.0));
    Ok(())
}

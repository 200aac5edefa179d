use beltsight_camera::{ChannelOrder, Frame, PrefetchSource, ReplaySource};
use beltsight_detect::{BoxDecoder, DetectionEngine, Inference};
use beltsight_pipeline::{Command, FrameOutput, Mode, Pipeline, PipelineConfig, Step};
use ndarray::{Array4, ArrayD, IxDyn};
use std::io::Write;
use std::time::Duration;

/// One object that moves by `(dx, dy)` frame pixels per inference call on a
/// 640×480 frame.
struct Mover {
    cx: f32,
    cy: f32,
    dx: f32,
    dy: f32,
}

impl Mover {
    fn new(dx: f32, dy: f32) -> Self {
        Self { cx: 128.0, cy: 120.0, dx, dy }
    }
}

impl Inference for Mover {
    fn infer(&mut self, _input: Array4<f32>) -> beltsight_detect::Result<ArrayD<f32>> {
        let mut out = ArrayD::zeros(IxDyn(&[1, 5, 2]));
        out[[0, 0, 0]] = self.cx / 640.0;
        out[[0, 1, 0]] = self.cy / 480.0;
        out[[0, 2, 0]] = 0.1;
        out[[0, 3, 0]] = 0.1;
        out[[0, 4, 0]] = 0.9;
        // background anchor, always below threshold
        out[[0, 4, 1]] = 0.1;
        self.cx += self.dx;
        self.cy += self.dy;
        Ok(out)
    }
}

fn replay(n: usize) -> ReplaySource {
    let frames = (0..n)
        .map(|_| Frame::filled(640, 480, ChannelOrder::Bgr, 128, Duration::ZERO))
        .collect();
    ReplaySource::from_frames(frames, 30.0).expect("replay")
}

fn engine(backend: Mover) -> DetectionEngine<Mover> {
    let pp = beltsight_preprocess::Preprocessor::new(32, 32, beltsight_preprocess::TensorLayout::Nchw)
        .expect("preprocessor");
    DetectionEngine::new(backend, pp, BoxDecoder::new(1))
}

fn conveyor_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.performance.mode = Mode::Quality;
    cfg.conveyor.enabled = true;
    cfg
}

#[test]
fn measured_belt_speed_retunes_the_loop() -> anyhow::Result<()> {
    // 80 px per frame at 30 fps and 1000 px/m → 2.4 m/s → 24 Hz
    let mut p = Pipeline::new(&conveyor_config(), replay(10), engine(Mover::new(80.0, 0.0)))?;
    let mut speeds = Vec::new();
    for _ in 0..3 {
        p.step(&mut |out: &FrameOutput<'_>| speeds.push(out.conveyor_speed))?;
    }

    assert_eq!(speeds[0], Some(0.0));
    let speed = speeds[2].unwrap_or_default();
    assert!((speed - 2.4).abs() / 2.4 < 0.05, "speed {speed}");
    assert_eq!(p.state().frame_skip(), 2);
    assert_eq!(p.state().confidence(), 0.7);
    Ok(())
}

#[test]
fn vertical_motion_leaves_speed_at_zero() -> anyhow::Result<()> {
    let mut p = Pipeline::new(&conveyor_config(), replay(8), engine(Mover::new(0.0, 30.0)))?;
    let summary = p.run(&mut beltsight_pipeline::NullSink)?;
    assert_eq!(summary.processed, 8);
    assert_eq!(summary.final_speed_mps, 0.0);
    assert_eq!(p.state().frame_skip(), 1);
    Ok(())
}

#[test]
fn conveyor_off_reports_no_speed() -> anyhow::Result<()> {
    let mut cfg = conveyor_config();
    cfg.conveyor.enabled = false;
    let mut p = Pipeline::new(&cfg, replay(4), engine(Mover::new(80.0, 0.0)))?;
    let mut speeds = Vec::new();
    p.run(&mut |out: &FrameOutput<'_>| speeds.push(out.conveyor_speed))?;
    assert!(speeds.iter().all(Option::is_none));

    // toggling it on mid-run starts measuring
    p.apply(Command::ToggleConveyor);
    assert!(p.conveyor().enabled());
    Ok(())
}

#[test]
fn config_file_drives_the_run() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"
        [performance]
        mode = "speed"

        [roi]
        enabled = true
        x1 = 0.5

        [alerts]
        enabled = true
        cooldown_s = 10.0
        "#
    )?;
    let cfg = PipelineConfig::from_file(file.path())?;

    // object centre sits at x = 128 px, left of the ROI → always filtered
    let mut p = Pipeline::new(&cfg, replay(6), engine(Mover::new(0.0, 0.0)))?;
    let mut outputs = Vec::new();
    let summary = p.run(&mut |out: &FrameOutput<'_>| outputs.push((out.processed, out.detections.len(), out.alert)))?;

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.alerts, 0);
    assert!(outputs.iter().all(|o| o.1 == 0 && !o.2));
    Ok(())
}

#[test]
fn alerts_are_rate_limited() -> anyhow::Result<()> {
    let mut cfg = PipelineConfig::default();
    cfg.alerts.enabled = true;
    cfg.alerts.cooldown_s = 0.09;
    let mut p = Pipeline::new(&cfg, replay(9), engine(Mover::new(0.0, 0.0)))?;
    let mut alerts = Vec::new();
    let summary = p.run(&mut |out: &FrameOutput<'_>| alerts.push(out.alert))?;

    // 30 fps with a 90 ms cooldown: every third frame
    assert_eq!(summary.alerts, 3);
    assert!(alerts[0] && alerts[3] && alerts[6]);
    Ok(())
}

#[test]
fn prefetched_source_runs_to_end() -> anyhow::Result<()> {
    let source = PrefetchSource::spawn(replay(5));
    let mut p = Pipeline::new(&PipelineConfig::default(), source, engine(Mover::new(10.0, 0.0)))?;
    let mut coverage = Vec::new();
    let summary = p.run(&mut |out: &FrameOutput<'_>| coverage.push(out.coverage))?;
    assert_eq!(summary.frames, 5);
    // 64×48 box on 640×480
    assert!(coverage.iter().all(|c| (c - 1.0).abs() < 1e-3));
    assert_eq!(p.step(&mut beltsight_pipeline::NullSink)?, Step::EndOfStream);
    Ok(())
}

#[test]
fn shipped_config_matches_defaults() -> anyhow::Result<()> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/beltsight.toml");
    let cfg = PipelineConfig::from_file(path)?;
    cfg.validate()?;
    assert_eq!(cfg, PipelineConfig::default());
    Ok(())
}

// beltsight-camera/src/lib.rs
// ============================================================
// Frame acquisition for beltsight
// A frame source is anything that hands out timestamped packed
// 8-bit rasters at a fixed resolution and reports which channel
// order (RGB / BGR) it delivers.
// ------------------------------------------------------------
// Public API:
//   * FrameSource           – capability trait, one per back-end
//   * ReplaySource          – in-memory / image-directory replay
//   * PrefetchSource        – moves a source onto a reader thread
//   * GstCamera             – libcamerasrc / v4l2src (feature `gstreamer`)
// ============================================================

//! beltsight – camera capture layer
//!
//! Every back-end implements [`FrameSource`].  The pipeline picks one at
//! start-up and never branches on the concrete type afterwards; the only
//! back-end specific fact that leaks downstream is
//! [`FrameSource::channel_order`], which the preprocessor must consult before
//! normalising pixels.

use std::time::Duration;
use thiserror::Error;

mod prefetch;
mod replay;
#[cfg(feature = "gstreamer")]
mod gst_camera;

pub use prefetch::PrefetchSource;
pub use replay::ReplaySource;
#[cfg(feature = "gstreamer")]
pub use gst_camera::{CaptureSource, GstCamera};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera back-end failed: {0}")]
    Backend(String),
    #[error("frame is {got} bytes, expected {expected} for {width}x{height}x3")]
    FrameSize {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
    #[error("replay frame rate must be positive")]
    InvalidRate,
    #[error("no images found in {0}")]
    EmptyDirectory(String),
    #[error("failed to read image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("reader thread disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, CameraError>;

/// Byte order of the three colour channels inside a packed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A captured frame: packed 8-bit, three channels, row-major, no padding.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channel_order: ChannelOrder,
    /// Capture time relative to the start of the stream.
    pub timestamp: Duration,
}

impl Frame {
    /// Wrap a pixel buffer, checking that its length matches the geometry.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        channel_order: ChannelOrder,
        timestamp: Duration,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(CameraError::FrameSize {
                width,
                height,
                expected,
                got: pixels.len(),
            });
        }
        Ok(Self { pixels, width, height, channel_order, timestamp })
    }

    /// A uniformly filled frame; mostly useful for tests and warm-up.
    pub fn filled(
        width: u32,
        height: u32,
        channel_order: ChannelOrder,
        value: u8,
        timestamp: Duration,
    ) -> Self {
        Self {
            pixels: vec![value; width as usize * height as usize * 3],
            width,
            height,
            channel_order,
            timestamp,
        }
    }

    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp.as_secs_f64()
    }
}

/// Capability interface shared by all camera back-ends.
pub trait FrameSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn channel_order(&self) -> ChannelOrder;

    /// Blocks until the next frame is available.
    /// `Ok(None)` means the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn channel_order(&self) -> ChannelOrder {
        (**self).channel_order()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        let err = Frame::new(vec![0; 10], 4, 4, ChannelOrder::Rgb, Duration::ZERO).unwrap_err();
        assert!(matches!(err, CameraError::FrameSize { expected: 48, got: 10, .. }));
    }

    #[test]
    fn filled_frame_has_packed_size() {
        let f = Frame::filled(640, 480, ChannelOrder::Bgr, 7, Duration::from_millis(40));
        assert_eq!(f.pixels.len(), 640 * 480 * 3);
        assert!((f.timestamp_secs() - 0.04).abs() < 1e-9);
    }
}

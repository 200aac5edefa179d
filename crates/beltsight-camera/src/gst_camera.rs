// beltsight-camera/src/gst_camera.rs
//
// libcamerasrc (Pi) or v4l2src (USB webcam) → videoconvert → appsink.
// The two sources are asked for different packed formats, so the
// channel order is decided here once and reported through FrameSource.

use crate::{CameraError, ChannelOrder, Frame, FrameSource, Result};
use gst::prelude::*;
use std::time::Duration;

/// GStreamer capture handle – owns the pipeline and *appsink*.
pub struct GstCamera {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    width: u32,
    height: u32,
    channel_order: ChannelOrder,
}

/// Which GStreamer element feeds the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// CSI camera on the Pi, delivers RGB.
    Libcamera,
    /// USB webcam, delivers BGR.
    V4l2 { device: String },
}

impl CaptureSource {
    fn launch_parts(&self) -> (String, &'static str, ChannelOrder) {
        match self {
            CaptureSource::Libcamera => ("libcamerasrc".into(), "RGB", ChannelOrder::Rgb),
            CaptureSource::V4l2 { device } => (format!("v4l2src device={device}"), "BGR", ChannelOrder::Bgr),
        }
    }
}

impl GstCamera {
    /// Build and start a capture pipeline delivering packed 24-bit frames,
    /// preferring libcamerasrc when the plugin is installed.
    ///
    /// ```no_run
    /// use beltsight_camera::{FrameSource, GstCamera};
    /// let mut cam = GstCamera::new(640, 480, 30).unwrap();
    /// let frame = cam.next_frame().unwrap();
    /// ```
    pub fn new(width: u32, height: u32, fps: u32) -> Result<Self> {
        gst::init().map_err(|e| CameraError::Backend(format!("gst init: {e}")))?;
        let source = if gst::ElementFactory::find("libcamerasrc").is_some() {
            CaptureSource::Libcamera
        } else {
            CaptureSource::V4l2 { device: "/dev/video0".into() }
        };
        Self::open(source, width, height, fps)
    }

    pub fn open(source: CaptureSource, width: u32, height: u32, fps: u32) -> Result<Self> {
        gst::init().map_err(|e| CameraError::Backend(format!("gst init: {e}")))?;
        let (src, format, channel_order) = source.launch_parts();

        // one-buffer leaky queue: a slow consumer sees the newest frame
        let pipe_str = format!(
            "{src} ! videoconvert ! video/x-raw,format={format},width={w},height={h},framerate={f}/1 \
            ! queue leaky=2 max-size-buffers=1 ! appsink name=sink sync=false max-buffers=1 drop=true",
            w = width, h = height, f = fps
        );
        log::info!("starting capture pipeline: {pipe_str}");

        let pipeline = gst::parse::launch(&pipe_str)
            .map_err(|e| CameraError::Backend(format!("parse pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CameraError::Backend("pipeline is not a gst::Pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Backend("appsink element not found".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CameraError::Backend("appsink downcast failed".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CameraError::Backend(format!("set Playing: {e}")))?;

        Ok(Self { pipeline, appsink, width, height, channel_order })
    }

    /// Convert a `gst::Sample` into an owned [`Frame`].
    fn sample_to_frame(&self, sample: gst::Sample) -> Result<Frame> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| CameraError::Backend("sample has no buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| CameraError::Backend("sample has no caps".into()))?;
        let s = caps
            .structure(0)
            .ok_or_else(|| CameraError::Backend("caps missing structure".into()))?;
        let width = s
            .get::<i32>("width")
            .map_err(|e| CameraError::Backend(e.to_string()))? as u32;
        let height = s
            .get::<i32>("height")
            .map_err(|e| CameraError::Backend(e.to_string()))? as u32;

        let pts = buffer
            .pts()
            .map(|t| Duration::from_nanos(t.nseconds()))
            .unwrap_or(Duration::ZERO);

        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::Backend(format!("buffer map: {e}")))?;
        let pixels = pack_rows(map.as_slice(), width, height)?;
        drop(map);

        Frame::new(pixels, width, height, self.channel_order, pts)
    }
}

/// Strips row padding (GStreamer pads packed RGB rows to 4 bytes).  A buffer
/// too small for `height` rows of `width` pixels is a size error.
fn pack_rows(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let row = width as usize * 3;
    let rows = height as usize;
    let stride = if rows == 0 { 0 } else { data.len() / rows };
    if stride < row || stride == 0 {
        return Err(CameraError::FrameSize { width, height, expected: row * rows, got: data.len() });
    }
    if stride == row {
        return Ok(data[..row * rows].to_vec());
    }
    let mut pixels = Vec::with_capacity(row * rows);
    for line in data.chunks(stride).take(rows) {
        pixels.extend_from_slice(&line[..row]);
    }
    Ok(pixels)
}

impl FrameSource for GstCamera {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.appsink.pull_sample() {
            Ok(sample) => self.sample_to_frame(sample).map(Some),
            Err(_) if self.appsink.is_eos() => Ok(None),
            Err(e) => Err(CameraError::Backend(format!("pull sample: {e}"))),
        }
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

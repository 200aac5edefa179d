// beltsight-camera/src/replay.rs
//
// Replays a fixed list of frames at a nominal rate. Timestamps are
// synthetic (index / fps) so motion estimates stay deterministic.

use crate::{CameraError, ChannelOrder, Frame, FrameSource, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub struct ReplaySource {
    frames: VecDeque<Frame>,
    width: u32,
    height: u32,
    channel_order: ChannelOrder,
    period: Duration,
    emitted: u32,
}

impl ReplaySource {
    /// Replay frames already held in memory. Their own timestamps are
    /// replaced by `index / fps`.
    pub fn from_frames(frames: Vec<Frame>, fps: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(CameraError::InvalidRate);
        }
        let (width, height, channel_order) = frames
            .first()
            .map(|f| (f.width, f.height, f.channel_order))
            .unwrap_or((0, 0, ChannelOrder::Rgb));
        Ok(Self {
            frames: frames.into(),
            width,
            height,
            channel_order,
            period: Duration::from_secs_f64(1.0 / fps),
            emitted: 0,
        })
    }

    /// Load every image in `dir` (sorted by file name), resized to
    /// `width`×`height` and decoded as RGB.
    pub fn from_dir(dir: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(CameraError::EmptyDirectory(dir.display().to_string()));
        }

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let img = image::open(path)?;
            let rgb = if img.width() == width && img.height() == height {
                img.to_rgb8()
            } else {
                img.resize_exact(width, height, image::imageops::FilterType::Triangle)
                    .to_rgb8()
            };
            frames.push(Frame::new(rgb.into_raw(), width, height, ChannelOrder::Rgb, Duration::ZERO)?);
        }
        log::info!("loaded {} replay frames from {}", frames.len(), dir.display());
        Self::from_frames(frames, fps)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
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
        let Some(mut frame) = self.frames.pop_front() else {
            return Ok(None);
        };
        frame.timestamp = self.period * self.emitted;
        self.emitted += 1;
        Ok(Some(frame))
    }
}

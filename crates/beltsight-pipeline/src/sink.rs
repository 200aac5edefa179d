// beltsight-pipeline/src/sink.rs
use beltsight_camera::Frame;
use beltsight_detect::Detection;

/// Everything the loop hands out once per frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameOutput<'a> {
    pub frame: &'a Frame,
    /// Fresh on processed frames, the cached list otherwise.
    pub detections: &'a [Detection],
    /// Zero-based index of this frame in the run.
    pub index: u64,
    pub processed: bool,
    pub fps: f32,
    /// `Some` only while conveyor mode is on.
    pub conveyor_speed: Option<f32>,
    pub frame_skip: u32,
    pub render_overlay: bool,
    pub coverage: f32,
    pub alert: bool,
}

/// Display, logging or saving collaborator.
pub trait OutputSink {
    fn emit(&mut self, out: &FrameOutput<'_>);
}

impl<F> OutputSink for F
where
    F: FnMut(&FrameOutput<'_>),
{
    fn emit(&mut self, out: &FrameOutput<'_>) {
        self(out)
    }
}

/// Drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn emit(&mut self, _out: &FrameOutput<'_>) {}
}

/// Fires when a processed frame has at least `min_detections` objects, at
/// most once per `cooldown` seconds.
#[derive(Debug, Clone)]
pub struct AlertGate {
    min_detections: usize,
    cooldown: f64,
    last: Option<f64>,
}

impl AlertGate {
    pub fn new(min_detections: usize, cooldown: f64) -> Self {
        Self { min_detections: min_detections.max(1), cooldown, last: None }
    }

    pub fn check(&mut self, count: usize, timestamp: f64) -> bool {
        if count < self.min_detections {
            return false;
        }
        if self.last.is_some_and(|t| timestamp - t < self.cooldown) {
            return false;
        }
        self.last = Some(timestamp);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_respects_threshold_and_cooldown() {
        let mut gate = AlertGate::new(2, 5.0);
        assert!(!gate.check(1, 0.0));
        assert!(gate.check(2, 0.5));
        assert!(!gate.check(3, 4.0));
        assert!(gate.check(2, 5.5));
    }
}

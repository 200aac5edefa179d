// beltsight-pipeline/src/stats.rs

/// Rolling FPS over roughly one second of frame timestamps.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    frame_count: u64,
    window_start: Option<f64>,
    window_frames: u32,
    current_fps: f32,
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one frame seen at `timestamp` (seconds).  The FPS value is
    /// refreshed once the window spans at least a second.
    pub fn tick(&mut self, timestamp: f64) {
        self.frame_count += 1;
        let start = *self.window_start.get_or_insert(timestamp);
        self.window_frames += 1;

        let elapsed = timestamp - start;
        if elapsed >= 1.0 {
            // frames after the window opener
            self.current_fps = ((self.window_frames - 1) as f64 / elapsed) as f32;
            self.window_start = Some(timestamp);
            self.window_frames = 1;
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn current_fps(&self) -> f32 {
        self.current_fps
    }
}

/// Counters returned when a run ends.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    /// Frames that went through the detection engine successfully.
    pub processed: u64,
    /// Frames shown with the cached result (skipped or failed).
    pub reused: u64,
    pub inference_errors: u64,
    pub alerts: u64,
    pub final_fps: f32,
    pub final_speed_mps: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_rolls_over_each_second() {
        let mut stats = FrameStats::new();
        for i in 0..=30 {
            stats.tick(i as f64 / 30.0);
        }
        assert_eq!(stats.frame_count(), 31);
        assert!((stats.current_fps() - 30.0).abs() < 0.5, "fps {}", stats.current_fps());

        for i in 1..=10 {
            stats.tick(1.0 + i as f64 / 10.0);
        }
        assert!((stats.current_fps() - 10.0).abs() < 0.5, "fps {}", stats.current_fps());
    }

    #[test]
    fn no_fps_before_first_second() {
        let mut stats = FrameStats::new();
        stats.tick(0.0);
        stats.tick(0.5);
        assert_eq!(stats.current_fps(), 0.0);
    }
}

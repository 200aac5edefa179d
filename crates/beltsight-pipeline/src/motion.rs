// beltsight-pipeline/src/motion.rs
// ------------------------------------------------------------
// Belt speed from detection centroids.
//   window : every centroid seen within the trailing horizon
//   pairs  : each centroid matched to the nearest one of the previous
//            frame in the window, horizontal-dominant only
//   speed  : |dx| / px-per-m / dt, plausible band only, mean
// ------------------------------------------------------------

use beltsight_detect::Detection;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub timestamp: f64,
    pub cx: f32,
    pub cy: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParams {
    pub pixels_per_meter: f32,
    /// Seconds of history kept.
    pub horizon: f64,
    /// Exclusive `(min, max)` band of believable speeds, m/s.
    pub plausible: (f32, f32),
    /// Window size needed before an estimate is attempted.
    pub min_samples: usize,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self { pixels_per_meter: 1000.0, horizon: 5.0, plausible: (0.01, 10.0), min_samples: 3 }
    }
}

/// Trailing-window speed estimator.  Owns its samples exclusively.
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    params: MotionParams,
    samples: VecDeque<MotionSample>,
    speed: f32,
}

impl MotionEstimator {
    pub fn new(params: MotionParams) -> Self {
        Self { params, samples: VecDeque::new(), speed: 0.0 }
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    pub fn current_speed(&self) -> f32 {
        self.speed
    }

    pub fn window(&self) -> &VecDeque<MotionSample> {
        &self.samples
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.speed = 0.0;
    }

    /// Feed one processed frame.  Returns the new estimate when the window
    /// produced at least one valid pair; otherwise the previous estimate is
    /// kept and `None` is returned.
    pub fn observe(&mut self, dets: &[Detection], width: u32, height: u32, timestamp: f64) -> Option<f32> {
        let (w, h) = (width as f32, height as f32);
        for d in dets {
            let (cx, cy) = d.center();
            if !(0.0..=w).contains(&cx) || !(0.0..=h).contains(&cy) {
                continue;
            }
            self.samples.push_back(MotionSample { timestamp, cx, cy, confidence: d.confidence });
        }

        let cutoff = timestamp - self.params.horizon;
        while self.samples.front().is_some_and(|s| s.timestamp <= cutoff) {
            self.samples.pop_front();
        }

        if self.samples.len() < self.params.min_samples {
            return None;
        }

        let (lo, hi) = self.params.plausible;
        let mut sum = 0.0f64;
        let mut n = 0usize;
        // samples arrive frame by frame, so equal timestamps are contiguous
        let samples = self.samples.make_contiguous();
        let frames: Vec<&[MotionSample]> = samples.chunk_by(|a, b| a.timestamp == b.timestamp).collect();
        for pair in frames.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            for c in cur {
                let Some(p) = nearest(prev, c) else { continue };
                let dt = c.timestamp - p.timestamp;
                let dx = c.cx - p.cx;
                let dy = c.cy - p.cy;
                if dx.abs() <= dy.abs() || dt <= 0.0 {
                    continue;
                }
                let speed = (dx.abs() / self.params.pixels_per_meter) as f64 / dt;
                if speed > lo as f64 && speed < hi as f64 {
                    sum += speed;
                    n += 1;
                }
            }
        }

        if n == 0 {
            return None;
        }
        self.speed = (sum / n as f64) as f32;
        log::debug!("belt speed {:.3} m/s from {n} pairs", self.speed);
        Some(self.speed)
    }
}

fn nearest<'a>(candidates: &'a [MotionSample], to: &MotionSample) -> Option<&'a MotionSample> {
    let dist = |s: &MotionSample| (s.cx - to.cx).hypot(s.cy - to.cy);
    candidates.iter().min_by(|a, b| dist(a).total_cmp(&dist(b)))
}

/// Physical belt parameters plus the current speed estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConveyorState {
    speed_mps: f32,
    pixels_per_meter: f32,
    width_m: f32,
    enabled: bool,
    manual: bool,
}

impl ConveyorState {
    pub fn new(pixels_per_meter: f32, width_m: f32, enabled: bool) -> Self {
        Self { speed_mps: 0.0, pixels_per_meter, width_m, enabled, manual: false }
    }

    pub fn speed_mps(&self) -> f32 {
        self.speed_mps
    }

    pub fn pixels_per_meter(&self) -> f32 {
        self.pixels_per_meter
    }

    pub fn width_m(&self) -> f32 {
        self.width_m
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True while the speed comes from the operator rather than the estimator.
    pub fn manual(&self) -> bool {
        self.manual
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn set_measured_speed(&mut self, speed_mps: f32) {
        self.speed_mps = speed_mps.max(0.0);
    }

    /// A positive speed pins the estimate; zero or less hands it back to the
    /// estimator.
    pub(crate) fn set_manual_speed(&mut self, speed_mps: f32) {
        if speed_mps > 0.0 {
            self.speed_mps = speed_mps;
            self.manual = true;
        } else {
            self.manual = false;
        }
    }
}

/// Calibration from two image points a known distance apart on the belt.
/// `None` for coincident points or a non-positive distance.
pub fn pixels_per_meter(p1: (f32, f32), p2: (f32, f32), distance_m: f32) -> Option<f32> {
    let pixels = (p2.0 - p1.0).hypot(p2.1 - p1.1);
    if !(distance_m > 0.0) || !(pixels > 0.0) || !pixels.is_finite() {
        return None;
    }
    Some(pixels / distance_m)
}

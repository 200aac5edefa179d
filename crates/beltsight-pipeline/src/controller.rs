// beltsight-pipeline/src/controller.rs
// ------------------------------------------------------------
// Performance presets and the closed-loop tuning policy.
//   mode preset  → (frame skip, confidence, nms, target fps)
//   target fps   → frame skip            (fps bands)
//   belt speed   → frame skip            (speed / gap bands)
//                → confidence floor      (raise only)
//   manual speed → frame skip + target fps (manual bands)
// ------------------------------------------------------------

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

const LOW_LATENCY_CONFIDENCE: f32 = 0.4;
const LOW_LATENCY_NMS: f32 = 0.3;
const LOW_LATENCY_FPS: u32 = 60;

/// Manual speed entry derives a target FPS from `speed / gap`, kept in this range.
const MANUAL_FPS_RANGE: (f32, f32) = (5.0, 30.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Speed,
    Balanced,
    #[default]
    Quality,
    LowLatency,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Speed => "speed",
            Mode::Balanced => "balanced",
            Mode::Quality => "quality",
            Mode::LowLatency => "low_latency",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "speed" => Ok(Mode::Speed),
            "balanced" => Ok(Mode::Balanced),
            "quality" => Ok(Mode::Quality),
            "low_latency" | "lowlatency" => Ok(Mode::LowLatency),
            other => Err(format!("unknown mode `{other}`")),
        }
    }
}

/// Knobs read by the detection engine and the loop on every frame.
/// Invariant: `frame_skip >= 1`, thresholds in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceState {
    frame_skip: u32,
    confidence: f32,
    nms: f32,
    target_fps: u32,
    mode: Mode,
    render_overlay: bool,
}

impl PerformanceState {
    /// Named preset on top of the configured base thresholds.  Quality uses
    /// the base values as given.
    pub fn preset(mode: Mode, confidence: f32, nms: f32) -> Self {
        let (frame_skip, target_fps) = match mode {
            Mode::Quality => (1, 30),
            Mode::Balanced => (2, 20),
            Mode::Speed => (3, 10),
            Mode::LowLatency => (1, LOW_LATENCY_FPS),
        };
        let (confidence, nms) = match mode {
            Mode::Quality => (confidence, nms),
            Mode::Balanced => (confidence + 0.05, nms),
            Mode::Speed => (confidence + 0.1, nms - 0.05),
            Mode::LowLatency => (confidence.min(LOW_LATENCY_CONFIDENCE), nms.min(LOW_LATENCY_NMS)),
        };
        Self {
            frame_skip,
            confidence: confidence.clamp(0.0, 1.0),
            nms: nms.clamp(0.0, 1.0),
            target_fps,
            mode,
            render_overlay: mode != Mode::LowLatency,
        }
    }

    pub fn frame_skip(&self) -> u32 {
        self.frame_skip
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn nms(&self) -> f32 {
        self.nms
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// False in low-latency mode: sinks should skip overlay drawing.
    pub fn render_overlay(&self) -> bool {
        self.render_overlay
    }
}

/// `fps >= min_fps` selects `skip`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FpsBand {
    pub min_fps: u32,
    pub skip: u32,
}

/// `speed / target_gap > above_hz` selects `skip`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SpeedBand {
    pub above_hz: f32,
    pub skip: u32,
}

/// `speed > above_mps` raises the confidence threshold to at least `confidence`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ConfidenceFloor {
    pub above_mps: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuningPolicy {
    pub fps_bands: Vec<FpsBand>,
    pub speed_bands: Vec<SpeedBand>,
    /// Used for operator-entered speeds instead of `speed_bands`.
    pub manual_speed_bands: Vec<SpeedBand>,
    pub confidence_floors: Vec<ConfidenceFloor>,
    /// Spatial sampling resolution along the belt, metres.
    pub target_gap_m: f32,
    /// Speed changes smaller than this do not re-tune.
    pub material_change_mps: f32,
}

impl Default for TuningPolicy {
    fn default() -> Self {
        Self {
            fps_bands: vec![
                FpsBand { min_fps: 50, skip: 1 },
                FpsBand { min_fps: 30, skip: 1 },
                FpsBand { min_fps: 15, skip: 2 },
                FpsBand { min_fps: 0, skip: 3 },
            ],
            speed_bands: vec![
                SpeedBand { above_hz: 25.0, skip: 3 },
                SpeedBand { above_hz: 15.0, skip: 2 },
            ],
            manual_speed_bands: vec![
                SpeedBand { above_hz: 20.0, skip: 3 },
                SpeedBand { above_hz: 15.0, skip: 2 },
            ],
            confidence_floors: vec![
                ConfidenceFloor { above_mps: 2.0, confidence: 0.7 },
                ConfidenceFloor { above_mps: 1.0, confidence: 0.6 },
            ],
            target_gap_m: 0.1,
            material_change_mps: 0.05,
        }
    }
}

impl TuningPolicy {
    /// Bands are matched first-hit, so keep the strictest at the front.
    fn sorted(mut self) -> Self {
        self.fps_bands.sort_by(|a, b| b.min_fps.cmp(&a.min_fps));
        self.speed_bands.sort_by(|a, b| b.above_hz.total_cmp(&a.above_hz));
        self.manual_speed_bands.sort_by(|a, b| b.above_hz.total_cmp(&a.above_hz));
        self.confidence_floors.sort_by(|a, b| b.above_mps.total_cmp(&a.above_mps));
        self
    }

    pub fn skip_for_fps(&self, fps: u32) -> u32 {
        self.fps_bands
            .iter()
            .find(|b| fps >= b.min_fps)
            .or_else(|| self.fps_bands.last())
            .map_or(1, |b| b.skip)
            .max(1)
    }

    pub fn skip_for_frequency(&self, hz: f32) -> u32 {
        band_skip(&self.speed_bands, hz)
    }

    pub fn skip_for_manual_frequency(&self, hz: f32) -> u32 {
        band_skip(&self.manual_speed_bands, hz)
    }

    pub fn confidence_floor(&self, speed_mps: f32) -> Option<f32> {
        self.confidence_floors
            .iter()
            .find(|f| speed_mps > f.above_mps)
            .map(|f| f.confidence)
    }
}

fn band_skip(bands: &[SpeedBand], hz: f32) -> u32 {
    bands.iter().find(|b| hz > b.above_hz).map_or(1, |b| b.skip).max(1)
}

/// Sole writer of [`PerformanceState`].
#[derive(Debug, Clone)]
pub struct PerformanceController {
    state: PerformanceState,
    policy: TuningPolicy,
    base_confidence: f32,
    base_nms: f32,
    /// State to restore when low-latency mode is switched off.
    before_low_latency: Option<PerformanceState>,
    /// Speed the current state was tuned for.
    tuned_speed: Option<f32>,
}

impl PerformanceController {
    pub fn new(mode: Mode, confidence: f32, nms: f32, policy: TuningPolicy) -> Self {
        let initial = if mode == Mode::LowLatency { Mode::Quality } else { mode };
        let mut ctl = Self {
            state: PerformanceState::preset(initial, confidence, nms),
            policy: policy.sorted(),
            base_confidence: confidence,
            base_nms: nms,
            before_low_latency: None,
            tuned_speed: None,
        };
        if mode == Mode::LowLatency {
            ctl.enable_low_latency();
        }
        ctl
    }

    pub fn state(&self) -> &PerformanceState {
        &self.state
    }

    pub fn policy(&self) -> &TuningPolicy {
        &self.policy
    }

    pub fn is_low_latency(&self) -> bool {
        self.before_low_latency.is_some()
    }

    /// Explicit mode selection.  Leaving low-latency this way drops the
    /// saved state instead of restoring it.
    pub fn select_mode(&mut self, mode: Mode) {
        if mode == Mode::LowLatency {
            self.enable_low_latency();
            return;
        }
        self.before_low_latency = None;
        self.tuned_speed = None;
        self.state = PerformanceState::preset(mode, self.base_confidence, self.base_nms);
        log::info!(
            "mode {}: skip {}, conf {:.2}, nms {:.2}, target {} fps",
            mode,
            self.state.frame_skip,
            self.state.confidence,
            self.state.nms,
            self.state.target_fps
        );
    }

    /// Picks the frame skip for `fps` from the fps bands.  While low-latency
    /// is active the change lands in the saved state.
    pub fn set_target_fps(&mut self, fps: u32) -> u32 {
        let fps = fps.max(1);
        let skip = self.policy.skip_for_fps(fps);
        let target = self.before_low_latency.as_mut().unwrap_or(&mut self.state);
        target.target_fps = fps;
        target.frame_skip = skip;
        log::info!("target {fps} fps: processing every {skip} frame(s)");
        skip
    }

    pub fn set_frame_skip(&mut self, skip: u32) {
        let skip = skip.max(1);
        let target = self.before_low_latency.as_mut().unwrap_or(&mut self.state);
        target.frame_skip = skip;
        log::info!("frame skip set to {skip}");
    }

    pub fn enable_low_latency(&mut self) {
        if self.is_low_latency() {
            return;
        }
        self.before_low_latency = Some(self.state);
        let s = &mut self.state;
        s.mode = Mode::LowLatency;
        s.frame_skip = 1;
        s.target_fps = LOW_LATENCY_FPS;
        s.confidence = s.confidence.min(LOW_LATENCY_CONFIDENCE);
        s.nms = s.nms.min(LOW_LATENCY_NMS);
        s.render_overlay = false;
        log::info!(
            "low-latency mode on: every frame, conf {:.2}, nms {:.2}",
            s.confidence,
            s.nms
        );
    }

    pub fn disable_low_latency(&mut self) {
        if let Some(prev) = self.before_low_latency.take() {
            self.state = prev;
            self.tuned_speed = None;
            log::info!("low-latency mode off: back to {} (skip {})", prev.mode, prev.frame_skip);
        }
    }

    /// Returns whether low-latency mode is now on.
    pub fn toggle_low_latency(&mut self) -> bool {
        if self.is_low_latency() {
            self.disable_low_latency();
        } else {
            self.enable_low_latency();
        }
        self.is_low_latency()
    }

    /// Closed-loop update from a measured belt speed.  Changes below the
    /// material-change delta are ignored.  Returns true if the state changed.
    pub fn on_speed(&mut self, speed_mps: f32) -> bool {
        if !speed_mps.is_finite() || speed_mps <= 0.0 {
            return false;
        }
        if let Some(prev) = self.tuned_speed {
            if (speed_mps - prev).abs() < self.policy.material_change_mps {
                return false;
            }
        }
        self.tuned_speed = Some(speed_mps);
        self.retune(speed_mps)
    }

    /// Operator-entered belt speed: derives the target FPS and frame skip
    /// from the manual bands.  Confidence is left alone.  While low-latency
    /// is active the change lands in the saved state.
    pub fn apply_manual_speed(&mut self, speed_mps: f32) -> bool {
        if !speed_mps.is_finite() || speed_mps <= 0.0 {
            return false;
        }
        let required_hz = speed_mps / self.policy.target_gap_m;
        let (lo, hi) = MANUAL_FPS_RANGE;
        let fps = required_hz.clamp(lo, hi).round() as u32;
        let skip = self.policy.skip_for_manual_frequency(required_hz);
        let target = self.before_low_latency.as_mut().unwrap_or(&mut self.state);
        target.target_fps = fps;
        target.frame_skip = skip;

        self.tuned_speed = Some(speed_mps);
        log::info!("belt speed set to {speed_mps:.2} m/s: target {fps} fps, every {skip} frame(s)");
        true
    }

    fn retune(&mut self, speed_mps: f32) -> bool {
        let before = self.state;
        let required_hz = speed_mps / self.policy.target_gap_m;

        // low-latency pins every-frame processing
        if !self.is_low_latency() {
            self.state.frame_skip = self.policy.skip_for_frequency(required_hz);
        }
        if let Some(floor) = self.policy.confidence_floor(speed_mps) {
            if self.state.confidence < floor {
                self.state.confidence = floor;
            }
        }

        let changed = self.state != before;
        if changed {
            log::info!(
                "re-tuned for {:.2} m/s ({:.1} Hz): skip {}, conf {:.2}",
                speed_mps,
                required_hz,
                self.state.frame_skip,
                self.state.confidence
            );
        }
        changed
    }
}

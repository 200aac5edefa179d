// beltsight-pipeline/src/config.rs
//
// One TOML file, every key optional:
//
//   [model]       path, width, height, layout, classes, pixel_coords, timeout_ms, threads
//   [detection]   confidence, nms, max_detections, min_box_size
//   [roi]         enabled, x1, y1, x2, y2                      (fractions)
//   [performance] mode, target_fps, low_latency, fps_bands, speed_bands,
//                 manual_speed_bands, confidence_floors
//   [conveyor]    enabled, width_m, pixels_per_meter, calibration, target_gap_m,
//                 manual_speed_mps, horizon_s, min_speed_mps, max_speed_mps,
//                 min_samples, material_change_mps
//   [camera]      backend, device, width, height, fps, replay_dir
//   [alerts]      enabled, min_detections, cooldown_s

use crate::controller::{ConfidenceFloor, FpsBand, Mode, SpeedBand, TuningPolicy};
use crate::motion::{pixels_per_meter, MotionParams};
use crate::ConfigError;
use beltsight_detect::{BoxCoords, BoxDecoder, Roi};
use beltsight_preprocess::{Preprocessor, TensorLayout};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub roi: RoiConfig,
    pub performance: PerformanceConfig,
    pub conveyor: ConveyorConfig,
    pub camera: CameraConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutName {
    #[default]
    Nchw,
    Nhwc,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub layout: LayoutName,
    pub classes: usize,
    /// Box rows are in model-input pixels instead of `0..1`.
    pub pixel_coords: bool,
    pub timeout_ms: u64,
    /// Intra-op threads for back-ends that take a count; 0 = auto.
    pub threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/best.onnx"),
            width: 640,
            height: 640,
            layout: LayoutName::Nchw,
            classes: 1,
            pixel_coords: false,
            timeout_ms: 2000,
            threads: 0,
        }
    }
}

impl ModelConfig {
    pub fn tensor_layout(&self) -> TensorLayout {
        match self.layout {
            LayoutName::Nchw => TensorLayout::Nchw,
            LayoutName::Nhwc => TensorLayout::Nhwc,
        }
    }

    /// Fixed model input shape, batch of one.
    pub fn input_shape(&self) -> [usize; 4] {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            LayoutName::Nchw => [1, 3, h, w],
            LayoutName::Nhwc => [1, h, w, 3],
        }
    }

    pub fn preprocessor(&self) -> beltsight_preprocess::Result<Preprocessor> {
        Preprocessor::new(self.width, self.height, self.tensor_layout())
    }

    pub fn decoder(&self) -> BoxDecoder {
        let coords = if self.pixel_coords {
            BoxCoords::InputPixels { width: self.width as f32, height: self.height as f32 }
        } else {
            BoxCoords::Normalized
        };
        BoxDecoder::new(self.classes).with_coords(coords)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    pub confidence: f32,
    pub nms: f32,
    pub max_detections: usize,
    /// Minimum box width and height, frame pixels.
    pub min_box_size: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { confidence: 0.5, nms: 0.4, max_detections: 10, min_box_size: 20.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoiConfig {
    pub enabled: bool,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self { enabled: false, x1: 0.1, y1: 0.1, x2: 0.9, y2: 0.9 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerformanceConfig {
    pub mode: Mode,
    /// Overrides the preset's frame skip through the fps bands.
    pub target_fps: Option<u32>,
    pub low_latency: bool,
    pub fps_bands: Vec<FpsBand>,
    pub speed_bands: Vec<SpeedBand>,
    /// Bands for an operator-entered belt speed.
    pub manual_speed_bands: Vec<SpeedBand>,
    pub confidence_floors: Vec<ConfidenceFloor>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        let policy = TuningPolicy::default();
        Self {
            mode: Mode::default(),
            target_fps: None,
            low_latency: false,
            fps_bands: policy.fps_bands,
            speed_bands: policy.speed_bands,
            manual_speed_bands: policy.manual_speed_bands,
            confidence_floors: policy.confidence_floors,
        }
    }
}

/// Two image points a known distance apart on the belt surface.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalibrationConfig {
    pub p1: [f32; 2],
    pub p2: [f32; 2],
    pub distance_m: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConveyorConfig {
    pub enabled: bool,
    pub width_m: f32,
    pub pixels_per_meter: f32,
    /// Takes precedence over `pixels_per_meter`.
    pub calibration: Option<CalibrationConfig>,
    pub target_gap_m: f32,
    pub manual_speed_mps: Option<f32>,
    pub horizon_s: f64,
    pub min_speed_mps: f32,
    pub max_speed_mps: f32,
    pub min_samples: usize,
    pub material_change_mps: f32,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        let motion = MotionParams::default();
        let policy = TuningPolicy::default();
        Self {
            enabled: false,
            width_m: 0.5,
            pixels_per_meter: motion.pixels_per_meter,
            calibration: None,
            target_gap_m: policy.target_gap_m,
            manual_speed_mps: None,
            horizon_s: motion.horizon,
            min_speed_mps: motion.plausible.0,
            max_speed_mps: motion.plausible.1,
            min_samples: motion.min_samples,
            material_change_mps: policy.material_change_mps,
        }
    }
}

impl ConveyorConfig {
    /// Calibrated ratio when calibration points are given, the fixed one otherwise.
    pub fn effective_pixels_per_meter(&self) -> Result<f32, ConfigError> {
        match &self.calibration {
            Some(c) => pixels_per_meter((c.p1[0], c.p1[1]), (c.p2[0], c.p2[1]), c.distance_m).ok_or_else(|| {
                ConfigError::invalid("conveyor.calibration", "points must differ and distance_m must be > 0")
            }),
            None => Ok(self.pixels_per_meter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// CSI camera through libcamerasrc, RGB.
    #[default]
    Libcamera,
    /// USB camera through v4l2src, BGR.
    V4l2,
    /// Still images from `replay_dir`.
    Replay,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub backend: CameraBackend,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub replay_dir: Option<PathBuf>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackend::default(),
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            replay_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertConfig {
    pub enabled: bool,
    pub min_detections: usize,
    pub cooldown_s: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { enabled: false, min_detections: 1, cooldown_s: 5.0 }
    }
}

fn check_unit(field: &'static str, v: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be in [0, 1], got {v}")))
    }
}

fn check_positive(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be > 0, got {v}")))
    }
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Every range check in one place; run once before the loop starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.model;
        if m.width == 0 || m.height == 0 {
            return Err(ConfigError::invalid("model.width/height", "must be non-zero"));
        }
        if m.classes == 0 {
            return Err(ConfigError::invalid("model.classes", "must be at least 1"));
        }
        if m.timeout_ms == 0 {
            return Err(ConfigError::invalid("model.timeout_ms", "must be non-zero"));
        }

        let d = &self.detection;
        check_unit("detection.confidence", d.confidence)?;
        check_unit("detection.nms", d.nms)?;
        if d.max_detections == 0 {
            return Err(ConfigError::invalid("detection.max_detections", "must be at least 1"));
        }
        if !(d.min_box_size.is_finite() && d.min_box_size >= 0.0) {
            return Err(ConfigError::invalid("detection.min_box_size", "must be >= 0"));
        }

        self.roi()?;

        let p = &self.performance;
        if p.target_fps == Some(0) {
            return Err(ConfigError::invalid("performance.target_fps", "must be non-zero"));
        }
        if p.fps_bands.is_empty() {
            return Err(ConfigError::invalid("performance.fps_bands", "needs at least one band"));
        }
        let speed_bands = p.speed_bands.iter().chain(&p.manual_speed_bands);
        if p.fps_bands.iter().any(|b| b.skip == 0) || speed_bands.clone().any(|b| b.skip == 0) {
            return Err(ConfigError::invalid("performance bands", "skip must be at least 1"));
        }
        if speed_bands.clone().any(|b| !b.above_hz.is_finite()) {
            return Err(ConfigError::invalid("performance.speed_bands", "above_hz must be finite"));
        }
        for f in &p.confidence_floors {
            check_unit("performance.confidence_floors", f.confidence)?;
        }

        let c = &self.conveyor;
        check_positive("conveyor.width_m", c.width_m as f64)?;
        check_positive("conveyor.pixels_per_meter", c.effective_pixels_per_meter()? as f64)?;
        check_positive("conveyor.target_gap_m", c.target_gap_m as f64)?;
        check_positive("conveyor.horizon_s", c.horizon_s)?;
        if !(c.min_speed_mps >= 0.0 && c.min_speed_mps < c.max_speed_mps && c.max_speed_mps.is_finite()) {
            return Err(ConfigError::invalid(
                "conveyor.min_speed_mps/max_speed_mps",
                format!("need 0 <= min < max, got {}..{}", c.min_speed_mps, c.max_speed_mps),
            ));
        }
        if c.min_samples < 2 {
            return Err(ConfigError::invalid("conveyor.min_samples", "need at least 2 samples to pair"));
        }
        if !(c.material_change_mps.is_finite() && c.material_change_mps >= 0.0) {
            return Err(ConfigError::invalid("conveyor.material_change_mps", "must be >= 0"));
        }
        if let Some(s) = c.manual_speed_mps {
            check_positive("conveyor.manual_speed_mps", s as f64)?;
        }

        let cam = &self.camera;
        if cam.width == 0 || cam.height == 0 || cam.fps == 0 {
            return Err(ConfigError::invalid("camera", "width, height and fps must be non-zero"));
        }
        if cam.backend == CameraBackend::Replay && cam.replay_dir.is_none() {
            return Err(ConfigError::invalid("camera.replay_dir", "required for the replay backend"));
        }

        if self.alerts.min_detections == 0 {
            return Err(ConfigError::invalid("alerts.min_detections", "must be at least 1"));
        }
        if !(self.alerts.cooldown_s.is_finite() && self.alerts.cooldown_s >= 0.0) {
            return Err(ConfigError::invalid("alerts.cooldown_s", "must be >= 0"));
        }

        if c.pixels_per_meter < 100.0 && c.calibration.is_none() {
            log::warn!("conveyor.pixels_per_meter = {} looks low; calibrate the camera", c.pixels_per_meter);
        }
        Ok(())
    }

    /// The region filter, `None` when disabled.
    pub fn roi(&self) -> Result<Option<Roi>, ConfigError> {
        let r = &self.roi;
        if !r.enabled {
            return Ok(None);
        }
        Roi::new(r.x1, r.y1, r.x2, r.y2)
            .map(Some)
            .map_err(|e| ConfigError::invalid("roi", e.to_string()))
    }

    pub fn tuning_policy(&self) -> TuningPolicy {
        TuningPolicy {
            fps_bands: self.performance.fps_bands.clone(),
            speed_bands: self.performance.speed_bands.clone(),
            manual_speed_bands: self.performance.manual_speed_bands.clone(),
            confidence_floors: self.performance.confidence_floors.clone(),
            target_gap_m: self.conveyor.target_gap_m,
            material_change_mps: self.conveyor.material_change_mps,
        }
    }

    pub fn motion_params(&self) -> Result<MotionParams, ConfigError> {
        let c = &self.conveyor;
        Ok(MotionParams {
            pixels_per_meter: c.effective_pixels_per_meter()?,
            horizon: c.horizon_s,
            plausible: (c.min_speed_mps, c.max_speed_mps),
            min_samples: c.min_samples,
        })
    }
}

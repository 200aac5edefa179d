// beltsight-pipeline/src/lib.rs
// ============================================================
// beltsight-pipeline  –  Adaptive per-frame orchestration
// Decides which frames run detection, caches the last result
// for skipped frames, estimates belt speed from detections and
// re-tunes frame skip / thresholds from it.
// ------------------------------------------------------------
// Loop: FrameSource → (every Nth frame) DetectionEngine
//       → MotionEstimator → PerformanceController → OutputSink
// ------------------------------------------------------------
// Public API
//   * PipelineConfig        – TOML config, validated once
//   * Pipeline::step / run  – the loop itself
//   * PerformanceController – mode presets + closed-loop tuning
//   * MotionEstimator       – horizontal centroid speed estimate
//   * Command               – queued operator commands
// ============================================================

//! beltsight – pipeline layer
//!
//! All mutable run state (performance state, conveyor state, the cached
//! detection list, FPS statistics) is owned by [`Pipeline`] and only touched
//! from inside one loop iteration.  Operator input reaches the loop through a
//! [`Command`] channel drained at the top of every iteration.

use thiserror::Error;

mod command;
mod config;
mod controller;
mod motion;
mod pipeline;
mod sink;
mod stats;

pub use command::{Command, CommandParseError};
pub use config::{
    AlertConfig, CalibrationConfig, CameraBackend, CameraConfig, ConveyorConfig, DetectionConfig,
    LayoutName, ModelConfig, PerformanceConfig, PipelineConfig, RoiConfig,
};
pub use controller::{
    ConfidenceFloor, FpsBand, Mode, PerformanceController, PerformanceState, SpeedBand, TuningPolicy,
};
pub use motion::{pixels_per_meter, ConveyorState, MotionEstimator, MotionParams, MotionSample};
pub use pipeline::{Pipeline, Step};
pub use sink::{AlertGate, FrameOutput, NullSink, OutputSink};
pub use stats::{FrameStats, RunSummary};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

/// Errors that end a run.  Per-frame inference failures never show up here;
/// they are counted in [`RunSummary::inference_errors`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("frame source failed: {0}")]
    FrameSource(#[from] beltsight_camera::CameraError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// beltsight-pipeline/src/pipeline.rs
//
// One iteration:
//   1. drain queued commands
//   2. next frame (EOS / error ends the run)
//   3. index % skip == 0 → detect, refresh cache, feed motion → controller
//      otherwise (or on inference error) → reuse cache
//   4. FPS stats
//   5. hand the frame to the sink

use crate::controller::{PerformanceController, PerformanceState};
use crate::motion::{ConveyorState, MotionEstimator};
use crate::sink::{AlertGate, FrameOutput, OutputSink};
use crate::stats::{FrameStats, RunSummary};
use crate::{Command, PipelineConfig, PipelineError, Result};
use beltsight_camera::FrameSource;
use beltsight_detect::{coverage_percent, DetectParams, Detection, DetectionEngine, Inference, Roi};
use crossbeam_channel::Receiver;
use std::sync::Arc;

/// Outcome of one [`Pipeline::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Frame { processed: bool },
    Stopped,
    EndOfStream,
}

pub struct Pipeline<S, I> {
    source: S,
    engine: DetectionEngine<I>,
    controller: PerformanceController,
    conveyor: ConveyorState,
    motion: MotionEstimator,
    stats: FrameStats,
    /// Last successful detection list, shared with skipped frames.
    cache: Option<Arc<[Detection]>>,
    frame_index: u64,
    roi: Option<Roi>,
    max_detections: usize,
    min_box_size: f32,
    alerts: Option<AlertGate>,
    commands: Option<Receiver<Command>>,
    summary: RunSummary,
}

impl<S: FrameSource, I: Inference> Pipeline<S, I> {
    /// Validates `config` and builds all per-run state from it.
    pub fn new(config: &PipelineConfig, source: S, engine: DetectionEngine<I>) -> Result<Self> {
        config.validate()?;

        let det = &config.detection;
        let perf = &config.performance;
        let mode = if perf.low_latency { crate::Mode::LowLatency } else { perf.mode };
        let mut controller = PerformanceController::new(mode, det.confidence, det.nms, config.tuning_policy());
        if let Some(fps) = perf.target_fps {
            controller.set_target_fps(fps);
        }

        let motion_params = config.motion_params()?;
        let conv = &config.conveyor;
        let mut conveyor = ConveyorState::new(motion_params.pixels_per_meter, conv.width_m, conv.enabled);
        if let Some(speed) = conv.manual_speed_mps {
            conveyor.set_manual_speed(speed);
            controller.apply_manual_speed(speed);
        }

        let alerts = config
            .alerts
            .enabled
            .then(|| AlertGate::new(config.alerts.min_detections, config.alerts.cooldown_s));

        log::info!(
            "pipeline ready: {}x{} {:?}, mode {}, skip {}, conf {:.2}, nms {:.2}, conveyor {}",
            source.width(),
            source.height(),
            source.channel_order(),
            controller.state().mode(),
            controller.state().frame_skip(),
            controller.state().confidence(),
            controller.state().nms(),
            if conveyor.enabled() { "on" } else { "off" }
        );

        Ok(Self {
            source,
            engine,
            controller,
            conveyor,
            motion: MotionEstimator::new(motion_params),
            stats: FrameStats::new(),
            cache: None,
            frame_index: 0,
            roi: config.roi()?,
            max_detections: det.max_detections,
            min_box_size: det.min_box_size,
            alerts,
            commands: None,
            summary: RunSummary::default(),
        })
    }

    pub fn with_commands(mut self, commands: Receiver<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn state(&self) -> &PerformanceState {
        self.controller.state()
    }

    pub fn controller(&self) -> &PerformanceController {
        &self.controller
    }

    pub fn conveyor(&self) -> &ConveyorState {
        &self.conveyor
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn cached(&self) -> Option<&Arc<[Detection]>> {
        self.cache.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut DetectionEngine<I> {
        &mut self.engine
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            final_fps: self.stats.current_fps(),
            final_speed_mps: self.conveyor.speed_mps(),
            ..self.summary
        }
    }

    /// Applies one command.  Returns `false` for [`Command::Stop`].
    pub fn apply(&mut self, cmd: Command) -> bool {
        log::debug!("command {cmd:?}");
        match cmd {
            Command::Stop => return false,
            Command::SetFrameSkip(n) => self.controller.set_frame_skip(n),
            Command::ToggleConveyor => {
                let on = !self.conveyor.enabled();
                self.conveyor.set_enabled(on);
                if !on {
                    self.motion.reset();
                }
                log::info!("conveyor mode {}", if on { "on" } else { "off" });
            }
            Command::SetConveyorSpeed(speed) => {
                self.conveyor.set_manual_speed(speed);
                if self.controller.apply_manual_speed(speed) {
                    log::info!("conveyor speed set to {speed:.2} m/s");
                } else {
                    log::info!("conveyor speed back to measured");
                }
            }
            Command::ToggleLowLatency => {
                self.controller.toggle_low_latency();
            }
            Command::SelectMode(mode) => self.controller.select_mode(mode),
            Command::SetTargetFps(fps) => {
                self.controller.set_target_fps(fps);
            }
        }
        true
    }

    fn drain_commands(&mut self) -> bool {
        let Some(rx) = self.commands.clone() else {
            return true;
        };
        rx.try_iter().all(|cmd| self.apply(cmd))
    }

    fn detect_params(&self) -> DetectParams {
        let state = self.controller.state();
        DetectParams {
            confidence: state.confidence(),
            nms: state.nms(),
            max_detections: self.max_detections,
            min_box_size: self.min_box_size,
            roi: self.roi,
        }
    }

    /// Runs one loop iteration.  Frame-source failures are fatal and
    /// returned; inference failures fall back to the cached list.
    pub fn step<K: OutputSink + ?Sized>(&mut self, sink: &mut K) -> Result<Step> {
        if !self.drain_commands() {
            log::info!("stop requested");
            return Ok(Step::Stopped);
        }

        let frame = match self.source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("frame source exhausted");
                return Ok(Step::EndOfStream);
            }
            Err(e) => {
                log::error!("frame source failed: {e}");
                return Err(PipelineError::FrameSource(e));
            }
        };
        let ts = frame.timestamp_secs();

        let index = self.frame_index;
        self.frame_index += 1;
        let skip = self.controller.state().frame_skip().max(1) as u64;

        let mut processed = false;
        if index % skip == 0 {
            let params = self.detect_params();
            match self.engine.detect(&frame, &params) {
                Ok(dets) => {
                    processed = true;
                    if self.conveyor.enabled() && !self.conveyor.manual() {
                        if let Some(speed) = self.motion.observe(&dets, frame.width, frame.height, ts) {
                            self.conveyor.set_measured_speed(speed);
                            self.controller.on_speed(speed);
                        }
                    }
                    self.cache = Some(Arc::from(dets));
                }
                Err(e) => {
                    self.summary.inference_errors += 1;
                    log::warn!("frame {index}: inference failed, reusing last result: {e}");
                }
            }
        }

        self.summary.frames += 1;
        if processed {
            self.summary.processed += 1;
        } else {
            self.summary.reused += 1;
        }
        self.stats.tick(ts);

        let cache = self.cache.clone();
        let detections: &[Detection] = cache.as_deref().unwrap_or(&[]);
        let alert = processed
            && self
                .alerts
                .as_mut()
                .is_some_and(|gate| gate.check(detections.len(), ts));
        if alert {
            self.summary.alerts += 1;
            log::warn!("alert: {} objects in frame {index}", detections.len());
        }

        let state = self.controller.state();
        sink.emit(&FrameOutput {
            frame: &frame,
            detections,
            index,
            processed,
            fps: self.stats.current_fps(),
            conveyor_speed: self.conveyor.enabled().then(|| self.conveyor.speed_mps()),
            frame_skip: state.frame_skip(),
            render_overlay: state.render_overlay(),
            coverage: coverage_percent(detections, frame.width, frame.height),
            alert,
        });

        Ok(Step::Frame { processed })
    }

    /// Steps until stopped or the source ends.
    pub fn run<K: OutputSink + ?Sized>(&mut self, sink: &mut K) -> Result<RunSummary> {
        loop {
            match self.step(sink)? {
                Step::Frame { .. } => {}
                Step::Stopped | Step::EndOfStream => break,
            }
        }
        let summary = self.summary();
        log::info!(
            "run finished: {} frames, {} processed, {} reused, {} inference errors",
            summary.frames,
            summary.processed,
            summary.reused,
            summary.inference_errors
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mode;
    use beltsight_camera::{ChannelOrder, Frame, ReplaySource};
    use beltsight_detect::{BoxDecoder, DetectError};
    use beltsight_preprocess::{Preprocessor, TensorLayout};
    use crossbeam_channel::unbounded;
    use ndarray::{Array4, ArrayD, IxDyn};
    use std::cell::Cell;
    use std::rc::Rc;

    /// One fixed anchor per call; `fail_on` call indices return an error.
    struct Scripted {
        calls: Rc<Cell<usize>>,
        fail_on: Vec<usize>,
    }

    impl Inference for Scripted {
        fn infer(&mut self, _input: Array4<f32>) -> beltsight_detect::Result<ArrayD<f32>> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if self.fail_on.contains(&n) {
                return Err(DetectError::Backend("boom".into()));
            }
            let mut out = ArrayD::zeros(IxDyn(&[5, 1]));
            out[[0, 0]] = 0.5;
            out[[1, 0]] = 0.5;
            out[[2, 0]] = 0.2;
            out[[3, 0]] = 0.2;
            out[[4, 0]] = 0.9;
            Ok(out)
        }
    }

    fn pipeline(frames: usize, fail_on: Vec<usize>, cfg: &PipelineConfig) -> (Pipeline<ReplaySource, Scripted>, Rc<Cell<usize>>) {
        let frames = (0..frames)
            .map(|_| Frame::filled(64, 48, ChannelOrder::Rgb, 0, std::time::Duration::ZERO))
            .collect();
        let source = ReplaySource::from_frames(frames, 30.0).unwrap();
        let calls = Rc::new(Cell::new(0));
        let backend = Scripted { calls: calls.clone(), fail_on };
        let pp = Preprocessor::new(8, 8, TensorLayout::Nchw).unwrap();
        let engine = DetectionEngine::new(backend, pp, BoxDecoder::new(1));
        (Pipeline::new(cfg, source, engine).unwrap(), calls)
    }

    fn config(mode: Mode) -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.performance.mode = mode;
        cfg.detection.min_box_size = 0.0;
        cfg
    }

    #[test]
    fn skip_interval_controls_inference_calls() {
        let (mut p, calls) = pipeline(9, vec![], &config(Mode::Speed));
        let mut seen = Vec::new();
        let summary = p
            .run(&mut |out: &FrameOutput<'_>| seen.push((out.index, out.processed, out.detections.len())))
            .unwrap();

        assert_eq!(calls.get(), 3);
        assert_eq!((summary.frames, summary.processed, summary.reused), (9, 3, 6));
        let processed: Vec<u64> = seen.iter().filter(|s| s.1).map(|s| s.0).collect();
        assert_eq!(processed, vec![0, 3, 6]);
        // skipped frames still show the cached detection
        assert!(seen.iter().all(|s| s.2 == 1));
    }

    #[test]
    fn inference_error_falls_back_to_cache() {
        let (mut p, calls) = pipeline(3, vec![1], &config(Mode::Quality));
        let mut counts = Vec::new();
        let summary = p
            .run(&mut |out: &FrameOutput<'_>| counts.push((out.processed, out.detections.len())))
            .unwrap();

        assert_eq!(calls.get(), 3);
        assert_eq!(summary.inference_errors, 1);
        assert_eq!(counts, vec![(true, 1), (false, 1), (true, 1)]);
    }

    #[test]
    fn error_before_any_success_shows_nothing() {
        let (mut p, _) = pipeline(1, vec![0], &config(Mode::Quality));
        let mut got = None;
        p.step(&mut |out: &FrameOutput<'_>| got = Some(out.detections.len())).unwrap();
        assert_eq!(got, Some(0));
        assert!(p.cached().is_none());
    }

    #[test]
    fn commands_are_applied_before_the_frame() {
        let (p, calls) = pipeline(4, vec![], &config(Mode::Quality));
        let (tx, rx) = unbounded();
        let mut p = p.with_commands(rx);

        tx.send(Command::SetFrameSkip(2)).unwrap();
        tx.send(Command::ToggleLowLatency).unwrap();
        p.step(&mut crate::NullSink).unwrap();
        assert!(p.controller().is_low_latency());
        assert_eq!(p.state().frame_skip(), 1);

        tx.send(Command::ToggleLowLatency).unwrap();
        p.step(&mut crate::NullSink).unwrap();
        assert_eq!(p.state().frame_skip(), 2);

        tx.send(Command::Stop).unwrap();
        assert_eq!(p.step(&mut crate::NullSink).unwrap(), Step::Stopped);
        // index 1 was skipped under skip 2
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn end_of_stream_ends_run() {
        let (mut p, _) = pipeline(1, vec![], &config(Mode::Quality));
        assert_eq!(p.step(&mut crate::NullSink).unwrap(), Step::Frame { processed: true });
        assert_eq!(p.step(&mut crate::NullSink).unwrap(), Step::EndOfStream);
    }

    #[test]
    fn manual_speed_reports_and_retunes() {
        let mut cfg = config(Mode::Quality);
        cfg.conveyor.enabled = true;
        let (mut p, _) = pipeline(2, vec![], &cfg);
        p.apply(Command::SetConveyorSpeed(2.5));
        assert_eq!(p.state().frame_skip(), 3);
        assert_eq!(p.state().target_fps(), 25);
        assert_eq!(p.state().confidence(), 0.5);

        let mut speed = None;
        p.step(&mut |out: &FrameOutput<'_>| speed = out.conveyor_speed).unwrap();
        assert_eq!(speed, Some(2.5));
    }

    #[test]
    fn invalid_config_is_rejected_before_the_loop() {
        let mut cfg = config(Mode::Quality);
        cfg.detection.nms = 2.0;
        let source = ReplaySource::from_frames(vec![], 30.0).unwrap();
        let backend = Scripted { calls: Rc::new(Cell::new(0)), fail_on: vec![] };
        let engine = DetectionEngine::new(backend, Preprocessor::new(8, 8, TensorLayout::Nchw).unwrap(), BoxDecoder::new(1));
        assert!(matches!(Pipeline::new(&cfg, source, engine), Err(PipelineError::Config(_))));
    }
}

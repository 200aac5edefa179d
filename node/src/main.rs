use anyhow::{bail, Context, Result};
use beltsight_camera::{FrameSource, PrefetchSource, ReplaySource};
use beltsight_detect::{DetectionEngine, Inference, TimedInference};
use beltsight_pipeline::{
    CameraBackend, Command, FrameOutput, Mode, OutputSink, Pipeline, PipelineConfig, RunSummary,
};
use clap::{Parser, ValueEnum};
use crossbeam_channel::{unbounded, Sender};
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

// ================ CLI ================== //

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Engine {
    Tract,
    Ort,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Camera {
    Libcamera,
    V4l2,
    Replay,
}

/// Belt-side object detector.  Flags override the config file.
#[derive(Parser, Debug)]
#[command(name = "beltsight-node", version)]
struct CliArgs {
    /// TOML config; every key is optional
    #[arg(long)]
    config: Option<PathBuf>,

    /// ONNX weights
    #[arg(long)]
    weights: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "tract")]
    engine: Engine,

    #[arg(long, value_enum)]
    camera: Option<Camera>,

    /// Directory of still images for `--camera replay`
    #[arg(long)]
    replay_dir: Option<PathBuf>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    #[arg(long)]
    confidence: Option<f32>,

    #[arg(long)]
    nms: Option<f32>,

    /// speed | balanced | quality | low_latency
    #[arg(long, value_parser = parse_mode)]
    mode: Option<Mode>,

    #[arg(long)]
    target_fps: Option<u32>,

    #[arg(long)]
    low_latency: bool,

    /// Region of interest as fractions: x1,y1,x2,y2
    #[arg(long, value_parser = parse_roi)]
    roi: Option<[f32; 4]>,

    /// Enable conveyor mode (speed estimation + auto-tuning)
    #[arg(long)]
    conveyor: bool,

    /// Fixed belt speed in m/s instead of measuring it
    #[arg(long)]
    conveyor_speed: Option<f32>,

    /// Stop after this many frames
    #[arg(long)]
    num_frames: Option<u64>,

    /// Log a status line every N frames
    #[arg(long, default_value = "30")]
    status_every: u64,

    /// Do not read commands from stdin
    #[arg(long)]
    no_stdin: bool,
}

fn parse_mode(s: &str) -> std::result::Result<Mode, String> {
    s.parse()
}

fn parse_roi(s: &str) -> std::result::Result<[f32; 4], String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("`{p}`: {e}")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    parts
        .try_into()
        .map_err(|v: Vec<f32>| format!("expected 4 values, got {}", v.len()))
}

impl CliArgs {
    fn apply(&self, cfg: &mut PipelineConfig) {
        if let Some(w) = &self.weights {
            cfg.model.path = w.clone();
        }
        if let Some(cam) = self.camera {
            cfg.camera.backend = match cam {
                Camera::Libcamera => CameraBackend::Libcamera,
                Camera::V4l2 => CameraBackend::V4l2,
                Camera::Replay => CameraBackend::Replay,
            };
        }
        if let Some(dir) = &self.replay_dir {
            cfg.camera.replay_dir = Some(dir.clone());
        }
        if let Some(w) = self.width {
            cfg.camera.width = w;
        }
        if let Some(h) = self.height {
            cfg.camera.height = h;
        }
        if let Some(f) = self.fps {
            cfg.camera.fps = f;
        }
        if let Some(c) = self.confidence {
            cfg.detection.confidence = c;
        }
        if let Some(n) = self.nms {
            cfg.detection.nms = n;
        }
        if let Some(m) = self.mode {
            cfg.performance.mode = m;
        }
        if let Some(t) = self.target_fps {
            cfg.performance.target_fps = Some(t);
        }
        if self.low_latency {
            cfg.performance.low_latency = true;
        }
        if let Some([x1, y1, x2, y2]) = self.roi {
            cfg.roi.enabled = true;
            (cfg.roi.x1, cfg.roi.y1, cfg.roi.x2, cfg.roi.y2) = (x1, y1, x2, y2);
        }
        if self.conveyor {
            cfg.conveyor.enabled = true;
        }
        if let Some(s) = self.conveyor_speed {
            cfg.conveyor.enabled = true;
            cfg.conveyor.manual_speed_mps = Some(s);
        }
    }
}

// ================ WIRING ================== //

/// 1) Frame source, moved onto its own reader thread
fn open_source(cfg: &PipelineConfig) -> Result<PrefetchSource> {
    let cam = &cfg.camera;
    let source: Box<dyn FrameSource + Send> = match cam.backend {
        CameraBackend::Replay => {
            let dir = cam.replay_dir.as_deref().context("replay backend needs camera.replay_dir")?;
            let replay = ReplaySource::from_dir(dir, cam.width, cam.height, cam.fps as f64)
                .with_context(|| format!("loading frames from {}", dir.display()))?;
            log::info!("replaying {} frames from {}", replay.remaining(), dir.display());
            Box::new(replay)
        }
        #[cfg(feature = "gstreamer")]
        CameraBackend::Libcamera | CameraBackend::V4l2 => {
            use beltsight_camera::{CaptureSource, GstCamera};
            let capture = match cam.backend {
                CameraBackend::V4l2 => CaptureSource::V4l2 { device: cam.device.clone() },
                _ => CaptureSource::Libcamera,
            };
            Box::new(GstCamera::open(capture, cam.width, cam.height, cam.fps).context("opening camera")?)
        }
        #[cfg(not(feature = "gstreamer"))]
        CameraBackend::Libcamera | CameraBackend::V4l2 => {
            bail!("built without the `gstreamer` feature; use --camera replay")
        }
    };
    Ok(PrefetchSource::spawn(source))
}

/// 2) Inference back-end behind a timeout guard
fn open_backend(engine: Engine, cfg: &PipelineConfig) -> Result<TimedInference> {
    let path = &cfg.model.path;
    let backend: Box<dyn Inference + Send> = match engine {
        #[cfg(feature = "tract")]
        Engine::Tract => Box::new(
            beltsight_detect::TractBackend::new(path, cfg.model.input_shape())
                .with_context(|| format!("loading {}", path.display()))?,
        ),
        #[cfg(feature = "ort")]
        Engine::Ort => Box::new(
            beltsight_detect::OrtBackend::new(path, cfg.model.threads)
                .with_context(|| format!("loading {}", path.display()))?,
        ),
        #[allow(unreachable_patterns)]
        other => bail!("built without the `{other:?}` engine feature"),
    };
    Ok(TimedInference::spawn(backend, cfg.model.timeout())?)
}

/// 3) Operator input: Ctrl-C and one command per stdin line
fn spawn_command_inputs(tx: &Sender<Command>, read_stdin: bool) -> Result<()> {
    let ctrl_c = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrl_c.send(Command::Stop);
    })
    .context("installing Ctrl-C handler")?;

    if read_stdin {
        let tx = tx.clone();
        thread::Builder::new().name("stdin-commands".into()).spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("{e} (keys: q, 1-3, c, s <m/s>, l, mode <name>, fps <n>)"),
                }
            }
        })?;
    }
    Ok(())
}

// ================ OUTPUT ================== //

/// Logs a status line every `every` frames, and any alert.
struct LogSink {
    every: u64,
    limit: Option<u64>,
    stop: Sender<Command>,
}

impl OutputSink for LogSink {
    fn emit(&mut self, out: &FrameOutput<'_>) {
        if out.index % self.every.max(1) == 0 {
            let speed = out
                .conveyor_speed
                .map(|s| format!(", belt {s:.2} m/s"))
                .unwrap_or_default();
            log::info!(
                "frame {}: {:.1} fps, {} detections ({:.1}% covered), skip {}{}",
                out.index,
                out.fps,
                out.detections.len(),
                out.coverage,
                out.frame_skip,
                speed
            );
        }
        if out.processed {
            for d in out.detections {
                log::debug!(
                    "  box ({:.0},{:.0})-({:.0},{:.0}) conf {:.2} class {}",
                    d.x1, d.y1, d.x2, d.y2, d.confidence, d.class_id
                );
            }
        }
        if out.alert {
            log::warn!("ALERT: {} objects detected", out.detections.len());
        }
        if self.limit.is_some_and(|n| out.index + 1 >= n) {
            let _ = self.stop.send(Command::Stop);
        }
    }
}

fn print_summary(s: &RunSummary) {
    println!("frames:           {}", s.frames);
    println!("processed:        {}", s.processed);
    println!("reused:           {}", s.reused);
    println!("inference errors: {}", s.inference_errors);
    println!("alerts:           {}", s.alerts);
    println!("last fps:         {:.1}", s.final_fps);
    println!("belt speed:       {:.2} m/s", s.final_speed_mps);
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 0) Config file, then CLI overrides, then validation
    let args = CliArgs::parse();
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    args.apply(&mut cfg);
    cfg.validate().context("invalid configuration")?;

    // 1-2) Collaborators
    let source = open_source(&cfg)?;
    let backend = open_backend(args.engine, &cfg)?;
    let engine = DetectionEngine::new(backend, cfg.model.preprocessor()?, cfg.model.decoder());

    // 3) Command queue
    let (tx, rx) = unbounded::<Command>();
    spawn_command_inputs(&tx, !args.no_stdin)?;

    // 4) Run
    let mut pipeline = Pipeline::new(&cfg, source, engine)?.with_commands(rx);
    let mut sink = LogSink { every: args.status_every, limit: args.num_frames, stop: tx };
    let summary = pipeline.run(&mut sink)?;

    print_summary(&summary);
    Ok(())
}

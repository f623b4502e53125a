//! sentineld - traffic sentinel daemon
//!
//! This daemon:
//! 1. Reads frames from a video file, image directory, or HTTP camera stream
//! 2. Detects and classifies vehicles, pedestrians, or generic objects
//! 3. Recognizes plate text on the nearest vehicles at a reduced cadence
//! 4. Drives the camera LED with the debounced priority level
//! 5. Keeps a detection log that can be exported while running
//!
//! Commands on stdin: `e`/`export`, `s`/`status`, `q`/`quit`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use traffic_sentinel::classify::DetectionMode;
use traffic_sentinel::config::{DetectorBackendKind, RecognitionBackendKind};
use traffic_sentinel::export::{export_log, ExportOptions};
use traffic_sentinel::ingest::{self, AcquirePolicy, FrameAcquirer};
use traffic_sentinel::{
    Actuator, DetectionLog, HttpLedActuator, NoopActuator, Pipeline, PriorityCell, SentinelConfig,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera host or full stream URL (e.g. 192.168.1.50 or http://cam/stream).
    #[arg(long, conflicts_with = "video")]
    ip: Option<String>,
    /// Stream path appended to a bare --ip host.
    #[arg(long)]
    stream_path: Option<String>,
    /// Local video file, image, image directory, or stub:// source.
    #[arg(long)]
    video: Option<PathBuf>,
    /// Processing scale for detection, in (0, 1].
    #[arg(long)]
    scale: Option<f32>,
    /// Track pedestrians alongside vehicles.
    #[arg(long, conflicts_with = "general_objects")]
    pedestrians: bool,
    /// Detect every object class instead of prioritized vehicles.
    #[arg(long)]
    general_objects: bool,
    /// Config file (.toml or .json); defaults to $SENTINEL_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// HTTP detector endpoint.
    #[arg(long)]
    detector_endpoint: Option<String>,
    /// JSON detection script to replay instead of a live detector.
    #[arg(long, conflicts_with = "detector_endpoint")]
    detector_script: Option<PathBuf>,
    /// HTTP text recognition endpoint.
    #[arg(long)]
    recognizer_endpoint: Option<String>,
    /// Disable text recognition (detection then runs on every frame).
    #[arg(long)]
    no_recognition: bool,
    /// Write an export when the loop ends.
    #[arg(long)]
    export_on_exit: bool,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = match &args.config {
            Some(path) => SentinelConfig::load_from(path)?,
            None => SentinelConfig::load()?,
        };
        apply_args(&mut cfg, &args);
        cfg.validate()?;
        cfg
    };

    let actuator: Box<dyn Actuator> = match cfg.actuator_host() {
        Some(host) => {
            log::info!("led actuator at http://{}/led", host);
            Box::new(HttpLedActuator::new(&host, cfg.actuator.timeout))
        }
        None => {
            log::info!("no actuator target; priority commands are skipped");
            Box::new(NoopActuator)
        }
    };

    let mut pipeline = {
        let _stage = ui.stage("Load detection backends");
        Pipeline::from_config(&cfg, actuator)?
    };

    let source = ingest::open_source(&cfg)?;
    let mut acquirer = FrameAcquirer::new(source, AcquirePolicy::from_config(&cfg));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("install ctrl-c handler")?;
    }

    let export_options = cfg.export_options();
    spawn_control_thread(
        pipeline.log(),
        pipeline.priority_cell(),
        export_options.clone(),
        Arc::clone(&stop),
    )?;

    log::info!(
        "sentineld running: mode={:?} detection every {} frames, recognition every {} processed frames, tracking max {} vehicles",
        cfg.detection.mode,
        cfg.effective_detection_interval(),
        cfg.detection.recognition_interval,
        cfg.detection.max_vehicles
    );

    let mut status = ui.status();
    let end = pipeline.run(&mut acquirer, &stop, args.max_frames, |report| {
        if let Some(line) = report.output.overlay.status.first() {
            status.update(&format!("frame {} | {}", report.frame_index, line));
        }
        if let Some(priority) = report.signal {
            status.println(&format!("priority -> {} ({})", priority, priority.color()));
        }
    })?;

    let stats = pipeline.stats();
    let cache = pipeline.cache_stats();
    status.finish(&format!(
        "stopped ({:?}): {} frames, {} processed, {} detection failures",
        end, stats.frames, stats.processed, stats.detection_failures
    ));
    log::info!(
        "recognition: {} calls, cache hits={} misses={} purged={}",
        stats.recognition_calls,
        cache.hits,
        cache.misses,
        cache.purged
    );
    let acquired = acquirer.stats();
    log::info!(
        "source: {} frames, {} restarts, {} failures, {} reconnects",
        acquired.frames,
        acquired.restarts,
        acquired.failures,
        acquired.reconnects
    );

    if args.export_on_exit {
        let path = export_log(&pipeline.log(), &export_options)?;
        println!("exported {}", path.display());
    }
    Ok(())
}

fn apply_args(cfg: &mut SentinelConfig, args: &Args) {
    if let Some(ip) = &args.ip {
        cfg.source.url = Some(ip.clone());
        cfg.source.video = None;
    }
    if let Some(video) = &args.video {
        cfg.source.video = Some(video.clone());
        cfg.source.url = None;
    }
    if let Some(path) = &args.stream_path {
        cfg.source.stream_path = path.clone();
    }
    if let Some(scale) = args.scale {
        cfg.source.process_scale = scale;
    }
    if args.pedestrians {
        cfg.detection.pedestrians = true;
    }
    if args.general_objects {
        cfg.detection.mode = DetectionMode::General;
        cfg.detection.pedestrians = false;
    }
    if let Some(endpoint) = &args.detector_endpoint {
        cfg.detector.backend = DetectorBackendKind::Http {
            endpoint: endpoint.clone(),
        };
    }
    if let Some(script) = &args.detector_script {
        cfg.detector.backend = DetectorBackendKind::Replay {
            script: Some(script.clone()),
        };
    }
    if let Some(endpoint) = &args.recognizer_endpoint {
        cfg.recognition.backend = RecognitionBackendKind::Http {
            endpoint: endpoint.clone(),
        };
    }
    if args.no_recognition {
        cfg.recognition.enabled = false;
    }
}

/// Read commands from stdin until EOF. Only touches the stop flag, log
/// snapshots and the priority cell.
fn spawn_control_thread(
    log: DetectionLog,
    priority: PriorityCell,
    export_options: ExportOptions,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("control".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match line.trim() {
                    "e" | "export" => match export_log(&log, &export_options) {
                        Ok(path) => println!("exported {}", path.display()),
                        Err(e) => eprintln!("export failed: {e}"),
                    },
                    "s" | "status" => println!(
                        "priority={} ({}) records={} evicted={}",
                        priority.get(),
                        priority.get().color(),
                        log.len(),
                        log.evicted()
                    ),
                    "q" | "quit" => {
                        stop.store(true, Ordering::SeqCst);
                        break;
                    }
                    "" => {}
                    other => eprintln!("unknown command '{other}' (e|s|q)"),
                }
            }
        })
        .map(|_| ())
        .map_err(|e| anyhow!("spawn control thread: {e}"))
}

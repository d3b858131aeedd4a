//! relayd - MJPEG relay daemon
//!
//! This daemon:
//! 1. Connects to the upstream camera's MJPEG endpoint (reconnecting forever)
//! 2. Runs each frame through the configured presence detector
//! 3. Reports presence transitions to the dashboard (or the log)
//! 4. Re-serves the annotated stream on `/video_feed` and status on `/detect_human/`

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use mjpeg_relay::{
    backend_by_name, ApiServer, DashboardNotifier, DetectionState, HttpSource, IngestLoop,
    LatestFrameStore, LogNotifier, Notifier, RelayConfig,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Relay an upstream MJPEG camera stream with presence detection"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Upstream MJPEG URL. Overrides the config file.
    #[arg(long)]
    upstream_url: Option<String>,

    /// Listen address for the restream API. Overrides the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Detector backend (motion, stub). Overrides the config file.
    #[arg(long)]
    detector: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = RelayConfig::load(args.config.as_deref())?;
    if let Some(url) = args.upstream_url {
        cfg.upstream.url = url;
    }
    if let Some(addr) = args.listen {
        cfg.server.addr = addr;
    }
    if let Some(detector) = args.detector {
        cfg.detector.backend = detector;
    }
    cfg.validate()?;

    let store = Arc::new(LatestFrameStore::new());
    let detection = Arc::new(DetectionState::new());

    let source = HttpSource::new(cfg.http_source_config())?;
    let detector = backend_by_name(&cfg.detector.backend, cfg.detector.motion_threshold)?;
    let notifier: Box<dyn Notifier> = match cfg.dashboard_config() {
        Some(dashboard) => {
            log::info!("dashboard notifications enabled: {}", dashboard.url);
            Box::new(DashboardNotifier::new(dashboard)?)
        }
        None => {
            log::warn!("dashboard credentials not configured; logging detection changes only");
            Box::new(LogNotifier)
        }
    };

    let api_handle = ApiServer::new(cfg.api_config(), store.clone(), detection.clone()).spawn()?;
    log::info!("relay api listening on {}", api_handle.addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    let ingest = IngestLoop::new(
        cfg.ingest_config(),
        Box::new(source),
        detector,
        notifier,
        store,
        detection,
    );
    let ingest_shutdown = shutdown.clone();
    let ingest_thread = std::thread::Builder::new()
        .name("relay-ingest".into())
        .spawn(move || ingest.run(ingest_shutdown))?;
    log::info!("relayd running. upstream {}", cfg.upstream.url);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("relayd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    shutdown.store(true, Ordering::SeqCst);
    api_handle.stop()?;
    let stats = ingest_thread
        .join()
        .map_err(|_| anyhow!("ingest thread panicked"))?;
    log::info!(
        "ingest totals: connections={} frames={} skipped={} notifications={}",
        stats.connections,
        stats.frames_processed,
        stats.frames_skipped,
        stats.notifications
    );

    Ok(())
}

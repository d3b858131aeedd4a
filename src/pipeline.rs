//! Ingestion loop.
//!
//! Owns the upstream connection lifecycle as an explicit state machine:
//!
//! ```text
//! Connecting --open ok--> Streaming --EOF--> Closed --reconnect delay--> Connecting
//!     |                       |
//!     +--open err--> Failed <-+--read err
//!                      |
//!                      +--backoff--> Connecting
//! ```
//!
//! Every frame cut out of the stream is decoded, analyzed, re-encoded and
//! written to the `LatestFrameStore`. A failure on a single frame skips that
//! frame only. Detection transitions (not frames) trigger notifications.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detect::DetectorBackend;
use crate::frame::{DetectionState, Frame, LatestFrameStore};
use crate::ingest::{MjpegExtractor, StreamSource};
use crate::transport::Notifier;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Bytes requested per body read.
    pub chunk_size: usize,
    /// Wait after a failed connect or a mid-stream error.
    pub backoff: Duration,
    /// Wait after the upstream closed the stream cleanly.
    pub reconnect_delay: Duration,
    /// Processing rate cap. 0 disables pacing.
    pub target_fps: u32,
    /// Re-encode quality (1..=100).
    pub jpeg_quality: u8,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            backoff: Duration::from_secs(1),
            reconnect_delay: Duration::from_millis(30),
            target_fps: 30,
            jpeg_quality: 80,
        }
    }
}

/// Counters for the health log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub connections: u64,
    pub connect_failures: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub notifications: u64,
}

enum IngestState {
    Connecting,
    Streaming(Box<dyn Read + Send>),
    Closed,
    Failed,
}

impl IngestState {
    fn label(&self) -> &'static str {
        match self {
            IngestState::Connecting => "connecting",
            IngestState::Streaming(_) => "streaming",
            IngestState::Closed => "closed",
            IngestState::Failed => "failed",
        }
    }
}

pub struct IngestLoop {
    config: IngestConfig,
    source: Box<dyn StreamSource>,
    detector: Box<dyn DetectorBackend>,
    notifier: Box<dyn Notifier>,
    store: Arc<LatestFrameStore>,
    detection: Arc<DetectionState>,
    extractor: MjpegExtractor,
    chunk: Vec<u8>,
    sequence: u64,
    next_frame_due: Option<Instant>,
    stats: IngestStats,
}

impl IngestLoop {
    pub fn new(
        config: IngestConfig,
        source: Box<dyn StreamSource>,
        detector: Box<dyn DetectorBackend>,
        notifier: Box<dyn Notifier>,
        store: Arc<LatestFrameStore>,
        detection: Arc<DetectionState>,
    ) -> Self {
        let chunk = vec![0u8; config.chunk_size.max(1)];
        Self {
            config,
            source,
            detector,
            notifier,
            store,
            detection,
            extractor: MjpegExtractor::new(),
            chunk,
            sequence: 0,
            next_frame_due: None,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Run until `shutdown` is set. Upstream failures never end the loop.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) -> IngestStats {
        if let Err(err) = self.detector.warm_up() {
            log::warn!("detector '{}' warm-up failed: {:#}", self.detector.name(), err);
        }
        log::info!(
            "ingest loop started: source={} detector={}",
            self.source.describe(),
            self.detector.name()
        );

        let mut state = IngestState::Connecting;
        let mut last_health_log = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            state = self.step(state);

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                log::info!(
                    "ingest health state={} connections={} frames={} skipped={} notifications={}",
                    state.label(),
                    self.stats.connections,
                    self.stats.frames_processed,
                    self.stats.frames_skipped,
                    self.stats.notifications
                );
                last_health_log = Instant::now();
            }
        }
        log::info!("ingest loop stopped");
        self.stats
    }

    fn step(&mut self, state: IngestState) -> IngestState {
        match state {
            IngestState::Connecting => match self.source.open() {
                Ok(reader) => {
                    self.extractor.clear();
                    self.stats.connections += 1;
                    log::info!("upstream connected: {}", self.source.describe());
                    IngestState::Streaming(reader)
                }
                Err(err) => {
                    self.stats.connect_failures += 1;
                    log::warn!("upstream unavailable: {:#}", err);
                    IngestState::Failed
                }
            },
            IngestState::Streaming(mut reader) => match reader.read(&mut self.chunk) {
                Ok(0) => {
                    log::info!("upstream stream ended");
                    IngestState::Closed
                }
                Ok(n) => {
                    let mut next = self.extractor.push(&self.chunk[..n]);
                    while let Some(jpeg) = next {
                        self.handle_frame(&jpeg);
                        next = self.extractor.next_frame();
                    }
                    IngestState::Streaming(reader)
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => IngestState::Streaming(reader),
                Err(err) => {
                    log::warn!("upstream read failed: {}", err);
                    IngestState::Failed
                }
            },
            IngestState::Closed => {
                std::thread::sleep(self.config.reconnect_delay);
                IngestState::Connecting
            }
            IngestState::Failed => {
                std::thread::sleep(self.config.backoff);
                IngestState::Connecting
            }
        }
    }

    fn handle_frame(&mut self, jpeg: &[u8]) {
        match self.process_frame(jpeg) {
            Ok(present) => {
                self.stats.frames_processed += 1;
                if self.detection.record(present) {
                    self.stats.notifications += 1;
                    self.notifier.notify(present);
                }
            }
            Err(err) => {
                self.stats.frames_skipped += 1;
                log::warn!("skipping frame: {:#}", err);
            }
        }
        self.pace();
    }

    /// Decode, analyze, re-encode and store one frame. Returns the presence flag.
    fn process_frame(&mut self, jpeg: &[u8]) -> Result<bool> {
        let image = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .context("decode jpeg")?
            .into_rgb8();
        let analysis = self
            .detector
            .analyze(image)
            .with_context(|| format!("detector '{}'", self.detector.name()))?;
        let encoded = encode_jpeg(&analysis.annotated, self.config.jpeg_quality)?;

        self.sequence += 1;
        self.store.write(Frame::new(encoded, self.sequence));
        Ok(analysis.subject_present)
    }

    fn pace(&mut self) {
        let interval = frame_interval(self.config.target_fps);
        if interval.is_zero() {
            return;
        }
        let now = Instant::now();
        if let Some(due) = self.next_frame_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_frame_due = Some(Instant::now() + interval);
    }
}

/// Encode an RGB raster as baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::api::ApiConfig;
use crate::detect::{BACKEND_NAMES, DEFAULT_MOTION_THRESHOLD};
use crate::ingest::HttpSourceConfig;
use crate::pipeline::IngestConfig;
use crate::transport::dashboard::{DashboardConfig, DEFAULT_DASHBOARD_URL};

const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8081/video_feed";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_DETECTOR: &str = "motion";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CHUNK_SIZE: usize = 1024;
const DEFAULT_BACKOFF_MS: u64 = 1_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 30;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_EMPTY_RETRY_MS: u64 = 20;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    upstream: Option<UpstreamConfigFile>,
    server: Option<ServerConfigFile>,
    detector: Option<DetectorConfigFile>,
    dashboard: Option<DashboardConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct UpstreamConfigFile {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    chunk_size: Option<usize>,
    backoff_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    target_fps: Option<u32>,
    empty_retry_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    motion_threshold: Option<f32>,
    jpeg_quality: Option<u8>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DashboardConfigFile {
    url: Option<String>,
    channel_id: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream: UpstreamSettings,
    pub server: ServerSettings,
    pub detector: DetectorSettings,
    pub dashboard: DashboardSettings,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub chunk_size: usize,
    pub backoff: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub target_fps: u32,
    pub empty_retry: Duration,
    pub write_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub motion_threshold: f32,
    pub jpeg_quality: u8,
    /// Ingestion pacing. 0 processes frames as fast as they arrive.
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub url: String,
    pub channel_id: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl RelayConfig {
    /// Load from `path` (or `RELAY_CONFIG` when `None`), then apply env overrides.
    ///
    /// Files ending in `.toml` are parsed as TOML, anything else as JSON.
    /// Values are not validated here; callers layer their own overrides on
    /// top and then call [`RelayConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("RELAY_CONFIG").ok();
        let config_path = path.or_else(|| env_path.as_deref().map(Path::new));
        let file_cfg = match config_path {
            Some(path) => read_config_file(path)?,
            None => RelayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Self {
        let upstream = file.upstream.unwrap_or_default();
        let server = file.server.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let dashboard = file.dashboard.unwrap_or_default();
        Self {
            upstream: UpstreamSettings {
                url: upstream
                    .url
                    .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
                connect_timeout: millis(upstream.connect_timeout_ms, DEFAULT_TIMEOUT_MS),
                read_timeout: millis(upstream.read_timeout_ms, DEFAULT_TIMEOUT_MS),
                chunk_size: upstream.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
                backoff: millis(upstream.backoff_ms, DEFAULT_BACKOFF_MS),
                reconnect_delay: millis(upstream.reconnect_delay_ms, DEFAULT_RECONNECT_DELAY_MS),
            },
            server: ServerSettings {
                addr: server
                    .addr
                    .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
                target_fps: server.target_fps.unwrap_or(DEFAULT_FPS),
                empty_retry: millis(server.empty_retry_ms, DEFAULT_EMPTY_RETRY_MS),
                write_timeout: millis(server.write_timeout_ms, DEFAULT_TIMEOUT_MS),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                motion_threshold: detector
                    .motion_threshold
                    .unwrap_or(DEFAULT_MOTION_THRESHOLD),
                jpeg_quality: detector.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                target_fps: detector.target_fps.unwrap_or(DEFAULT_FPS),
            },
            dashboard: DashboardSettings {
                url: dashboard
                    .url
                    .unwrap_or_else(|| DEFAULT_DASHBOARD_URL.to_string()),
                channel_id: dashboard.channel_id,
                api_key: dashboard.api_key,
                timeout: millis(dashboard.timeout_ms, DEFAULT_TIMEOUT_MS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("RELAY_UPSTREAM_URL") {
            self.upstream.url = url;
        }
        if let Some(addr) = non_empty_env("RELAY_LISTEN_ADDR") {
            self.server.addr = addr;
        }
        if let Some(backend) = non_empty_env("RELAY_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(fps) = non_empty_env("RELAY_TARGET_FPS") {
            self.detector.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("RELAY_TARGET_FPS must be an integer"))?;
        }
        if let Some(fps) = non_empty_env("RELAY_STREAM_FPS") {
            self.server.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("RELAY_STREAM_FPS must be an integer"))?;
        }
        if let Some(url) = non_empty_env("RELAY_DASHBOARD_URL") {
            self.dashboard.url = url;
        }
        if let Some(channel_id) = non_empty_env("RELAY_DASHBOARD_CHANNEL_ID") {
            self.dashboard.channel_id = Some(channel_id);
        }
        if let Some(api_key) = non_empty_env("RELAY_DASHBOARD_API_KEY") {
            self.dashboard.api_key = Some(api_key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let upstream = Url::parse(&self.upstream.url)
            .map_err(|e| anyhow!("invalid upstream url '{}': {}", self.upstream.url, e))?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(anyhow!("upstream url must be http(s), got '{}'", self.upstream.url));
        }
        if self.upstream.chunk_size == 0 {
            return Err(anyhow!("upstream chunk_size must be greater than zero"));
        }
        self.server
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.server.addr, e))?;
        if self.server.target_fps == 0 {
            return Err(anyhow!("server target_fps must be greater than zero"));
        }
        if !BACKEND_NAMES.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}'; expected one of {:?}",
                self.detector.backend,
                BACKEND_NAMES
            ));
        }
        let threshold = self.detector.motion_threshold;
        if !(threshold > 0.0 && threshold <= 255.0) {
            return Err(anyhow!("motion_threshold must be in (0, 255], got {}", threshold));
        }
        if !(1..=100).contains(&self.detector.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        Url::parse(&self.dashboard.url)
            .map_err(|e| anyhow!("invalid dashboard url '{}': {}", self.dashboard.url, e))?;
        Ok(())
    }

    pub fn http_source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            url: self.upstream.url.clone(),
            connect_timeout: self.upstream.connect_timeout,
            read_timeout: self.upstream.read_timeout,
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            chunk_size: self.upstream.chunk_size,
            backoff: self.upstream.backoff,
            reconnect_delay: self.upstream.reconnect_delay,
            target_fps: self.detector.target_fps,
            jpeg_quality: self.detector.jpeg_quality,
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.server.addr.clone(),
            target_fps: self.server.target_fps,
            empty_retry: self.server.empty_retry,
            write_timeout: self.server.write_timeout,
        }
    }

    /// Dashboard notifier settings, or `None` when credentials are missing.
    pub fn dashboard_config(&self) -> Option<DashboardConfig> {
        let channel_id = self.dashboard.channel_id.clone()?;
        let api_key = self.dashboard.api_key.clone()?;
        Some(DashboardConfig {
            url: self.dashboard.url.clone(),
            channel_id,
            api_key,
            timeout: self.dashboard.timeout,
        })
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn millis(value: Option<u64>, default_ms: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default_ms))
}

//! HTTP MJPEG upstream.
//!
//! Opens a streaming GET against the camera URL and hands the response body
//! back as a reader. No content-type negotiation: the body is scanned for JPEG
//! markers by `MjpegExtractor` regardless of what the camera claims to send.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use url::Url;

use super::StreamSource;

/// Upstream connection settings.
#[derive(Clone, Debug)]
pub struct HttpSourceConfig {
    pub url: String,
    pub connect_timeout: Duration,
    /// Maximum silence between body reads before the connection is treated as dead.
    pub read_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8081/video_feed".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpSource {
    url: Url,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse upstream url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported upstream scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self { url, agent })
    }
}

impl StreamSource for HttpSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn open(&mut self) -> Result<Box<dyn Read + Send>> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("connect to upstream {}", self.url))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(anyhow!("upstream {} returned status {}", self.url, status));
        }
        log::debug!(
            "upstream content-type: {}",
            response.header("Content-Type").unwrap_or("<none>")
        );
        Ok(Box::new(response.into_reader()))
    }
}

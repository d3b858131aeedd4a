//! Remote dashboard notifier.
//!
//! Pushes the presence flag to a channel-based IoT dashboard with a single GET:
//! `<url>?channel_id=<id>&api_key=<key>&field2=<1|0>`.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use super::Notifier;

pub const DEFAULT_DASHBOARD_URL: &str = "https://api.thinkv.space/update";

/// Dashboard field that carries the presence flag.
const PRESENCE_FIELD: &str = "field2";

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub url: String,
    pub channel_id: String,
    pub api_key: String,
    pub timeout: Duration,
}

pub struct DashboardNotifier {
    base: Url,
    channel_id: String,
    api_key: String,
    agent: ureq::Agent,
}

impl DashboardNotifier {
    pub fn new(config: DashboardConfig) -> Result<Self> {
        let base = Url::parse(&config.url).context("parse dashboard url")?;
        if config.channel_id.trim().is_empty() || config.api_key.trim().is_empty() {
            return Err(anyhow!("dashboard channel_id and api_key must both be set"));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            base,
            channel_id: config.channel_id,
            api_key: config.api_key,
            agent,
        })
    }

    /// Update URL for a given presence value.
    pub fn update_url(&self, subject_present: bool) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("channel_id", &self.channel_id)
            .append_pair("api_key", &self.api_key)
            .append_pair(PRESENCE_FIELD, if subject_present { "1" } else { "0" });
        url
    }

    fn push(&self, subject_present: bool) -> Result<u16> {
        let response = self
            .agent
            .request_url("GET", &self.update_url(subject_present))
            .call()
            .context("dashboard update request")?;
        Ok(response.status())
    }
}

impl Notifier for DashboardNotifier {
    fn notify(&mut self, subject_present: bool) {
        match self.push(subject_present) {
            Ok(status) => log::info!(
                "dashboard updated: status={} subject_present={}",
                status,
                subject_present
            ),
            Err(err) => log::warn!("dashboard update failed: {:#}", err),
        }
    }
}

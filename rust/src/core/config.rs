use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::AppCore;
use crate::backoff::Backoff;
use crate::realtime::{cable_url_for, ChannelConfig};
use crate::reconciler::DEFAULT_PENDING_CAPACITY;

pub(super) const CONFIG_FILE: &str = "deskline_config.json";

const DEFAULT_API_BASE_URL: &str = "https://app.chatwoot.com";
const DEFAULT_MAX_FETCH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) api_base_url: Option<String>,
    // Derived from `api_base_url` when unset.
    pub(super) websocket_url: Option<String>,
    pub(super) disable_network: Option<bool>,
    pub(super) reconnect_base_ms: Option<u64>,
    pub(super) reconnect_max_ms: Option<u64>,
    pub(super) stale_after_secs: Option<u64>,
    pub(super) max_fetch_attempts: Option<u32>,
    pub(super) pending_event_capacity: Option<usize>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "invalid config, using defaults");
            AppConfig::default()
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl AppConfig {
    pub(super) fn api_base_url(&self) -> String {
        non_empty(&self.api_base_url)
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub(super) fn websocket_url(&self) -> String {
        if let Some(url) = non_empty(&self.websocket_url) {
            return url.to_string();
        }
        cable_url_for(&self.api_base_url())
    }

    pub(super) fn channel_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::new(self.websocket_url());
        if let Some(ms) = self.reconnect_base_ms {
            config.reconnect_base = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = self.reconnect_max_ms {
            config.reconnect_max = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = self.stale_after_secs {
            config.stale_after = Duration::from_secs(secs.max(1));
        }
        config
    }

    pub(super) fn max_fetch_attempts(&self) -> u32 {
        self.max_fetch_attempts
            .unwrap_or(DEFAULT_MAX_FETCH_ATTEMPTS)
            .max(1)
    }

    pub(super) fn fetch_backoff(&self) -> Backoff {
        let channel = self.channel_config();
        Backoff::new(channel.reconnect_base, channel.reconnect_max)
    }

    pub(super) fn pending_event_capacity(&self) -> usize {
        self.pending_event_capacity
            .unwrap_or(DEFAULT_PENDING_CAPACITY)
            .max(1)
    }
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("DESKLINE_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{
    NOTIFICATION_CAP, NOTIFICATION_SURFACED, RECONNECT_INITIAL_DELAY_MS, RECONNECT_MAX_DELAY_MS,
};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: RECONNECT_INITIAL_DELAY_MS,
            max_delay_ms: RECONNECT_MAX_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given (zero-based) reconnect attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        std::time::Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    pub api_base_url: String,
    pub bus_url: String,
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,
    /// Build-time injected VAPID key. When set the key is not fetched from the server.
    #[serde(default)]
    pub vapid_public_key: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default = "default_cap")]
    pub notification_cap: usize,
    #[serde(default = "default_surfaced")]
    pub surfaced_count: usize,
}

fn default_cap() -> usize {
    NOTIFICATION_CAP
}

fn default_surfaced() -> usize {
    NOTIFICATION_SURFACED
}

impl CoreConfig {
    pub fn new(api_base_url: impl Into<String>, bus_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            bus_url: bus_url.into(),
            auth_token: None,
            vapid_public_key: None,
            reconnect: ReconnectPolicy::default(),
            notification_cap: NOTIFICATION_CAP,
            surfaced_count: NOTIFICATION_SURFACED,
        }
    }

    /// Load a JSON config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CoreError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let mut config: CoreConfig =
            serde_json::from_str(&contents).map_err(|e| CoreError::Config {
                message: format!("failed to parse {}: {}", path.display(), e),
            })?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Build a config from environment variables alone.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new("", "");
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TANDEM_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("TANDEM_BUS_URL") {
            self.bus_url = url;
        }
        if let Some(token) = lookup("TANDEM_TOKEN") {
            self.auth_token = Some(token);
        }
        if let Some(key) = lookup("TANDEM_VAPID_PUBLIC_KEY") {
            self.vapid_public_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| -> Result<()> {
            Err(CoreError::Config {
                message: message.to_string(),
            })
        };
        if self.api_base_url.trim().is_empty() {
            return fail("apiBaseUrl is required");
        }
        if self.bus_url.trim().is_empty() {
            return fail("busUrl is required");
        }
        if self.notification_cap == 0 {
            return fail("notificationCap must be positive");
        }
        if self.surfaced_count == 0 || self.surfaced_count > self.notification_cap {
            return fail("surfacedCount must be between 1 and notificationCap");
        }
        if self.reconnect.initial_delay_ms == 0
            || self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms
        {
            return fail("reconnect delays must satisfy 0 < initialDelayMs <= maxDelayMs");
        }
        Ok(())
    }
}

//! Engine configuration, loaded from a JSON file.
//!
//! Every field has a serde default, so a partial file (or `{}`) is a
//! valid config. `validate()` runs on load.

use crate::notifier::DEFAULT_LOW_BALANCE_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationConfig {
    /// Notification service endpoint. `None` logs notices instead.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerConfig {
    /// Admin action service. `None` keeps the local store authoritative.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerConfig {
    /// Period of the tick loop.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Balance below which one low-balance notice is sent.
    #[serde(default = "default_threshold")]
    pub low_balance_threshold: f64,
    /// Rate given to accounts on first admin interaction.
    #[serde(default = "default_coefficient")]
    pub default_coefficient: f64,
    /// Name recorded on ledger entries when the caller gives none.
    #[serde(default = "default_initiator")]
    pub default_initiator: String,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
}

fn default_tick_interval_ms() -> u64 { 1000 }
fn default_threshold() -> f64 { DEFAULT_LOW_BALANCE_THRESHOLD }
fn default_coefficient() -> f64 { 1.0 }
fn default_initiator() -> String { "admin".into() }
fn default_timeout_secs() -> u64 { 10 }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { webhook_url: None, timeout_secs: default_timeout_secs() }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { url: None, timeout_secs: default_timeout_secs() }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            low_balance_threshold: default_threshold(),
            default_coefficient: default_coefficient(),
            default_initiator: default_initiator(),
            notification: NotificationConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl TimerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    /// In tests, use TimerConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: TimerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Production defaults with every external endpoint switched off.
    pub fn default_test() -> Self {
        Self {
            tick_interval_ms: 1000,
            low_balance_threshold: 1000.0,
            default_coefficient: 1.0,
            default_initiator: "test".into(),
            notification: NotificationConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be > 0");
        }
        if !self.low_balance_threshold.is_finite() || self.low_balance_threshold < 0.0 {
            anyhow::bail!("low_balance_threshold must be a non-negative number");
        }
        if !self.default_coefficient.is_finite() {
            anyhow::bail!("default_coefficient must be finite");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TimerConfig =
            serde_json::from_str(r#"{ "low_balance_threshold": 500.0 }"#).unwrap();
        assert_eq!(cfg.low_balance_threshold, 500.0);
        assert_eq!(cfg.tick_interval_ms, 1000);
        assert_eq!(cfg.default_coefficient, 1.0);
        assert!(cfg.notification.webhook_url.is_none());
        assert_eq!(cfg.ledger.timeout_secs, 10);
    }

    #[test]
    fn empty_object_is_the_default_config() {
        let cfg: TimerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, TimerConfig::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = TimerConfig { tick_interval_ms: 0, ..TimerConfig::default() };
        assert!(cfg.validate().is_err());
    }
}

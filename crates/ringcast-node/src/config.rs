use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::property::MessageProperty;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Node-wide runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Realm claim stamped into every minted token.
    pub realm: String,
    /// Lifetime of subject capability tokens.
    pub token_ttl_ms: u64,
    /// Re-advertisement period; must stay below `token_ttl_ms`.
    pub token_refresh_ms: u64,
    /// How long a transmission waits for its acks.
    pub ack_timeout_ms: u64,
    /// Period of ledger pruning and ack sweeps.
    pub maintenance_interval_ms: u64,
    /// Bound on every ledger, property and table lock wait.
    pub lock_timeout_ms: u64,
    /// Empty ledgers untouched for this long are dropped.
    pub idle_ledger_ms: u64,
    /// Inbound message ids remembered for duplicate suppression.
    pub seen_message_capacity: usize,
    /// Applied to subjects first touched without explicit settings.
    pub default_property: MessageProperty,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            realm: "ringcast".to_string(),
            token_ttl_ms: 10_000,
            token_refresh_ms: 3_141,
            ack_timeout_ms: 2_000,
            maintenance_interval_ms: 314,
            lock_timeout_ms: 1_000,
            idle_ledger_ms: 120_000,
            seen_message_capacity: 4_096,
            default_property: MessageProperty::default(),
        }
    }
}

impl NodeConfig {
    /// Parses TOML; absent keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_ttl_ms == 0 {
            return Err(ConfigError::Invalid("token_ttl_ms must be positive"));
        }
        if self.token_refresh_ms == 0 || self.token_refresh_ms >= self.token_ttl_ms {
            return Err(ConfigError::Invalid(
                "token_refresh_ms must be positive and below token_ttl_ms",
            ));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock_timeout_ms must be positive"));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(ConfigError::Invalid("maintenance_interval_ms must be positive"));
        }
        if self.seen_message_capacity == 0 {
            return Err(ConfigError::Invalid("seen_message_capacity must be positive"));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, NodeConfig};
    use ringcast_core::{AckMode, CacheOrder, CachePolicy};

    #[test]
    fn default_config_is_valid() {
        let cfg = NodeConfig::default();
        cfg.validate().expect("defaults should validate");
        assert!(cfg.token_refresh_ms < cfg.token_ttl_ms);
        assert_eq!(cfg.default_property.max_threshold, 5);
    }

    #[test]
    fn toml_overrides_keep_other_defaults() {
        let cfg = NodeConfig::from_toml_str(
            r#"
            realm = "lab"
            token_ttl_ms = 6000
            token_refresh_ms = 2000

            [default_property]
            max_threshold = 9
            ack_mode = "Destination"
            cache_policy = { order = "Filo", purge = false, reject = true }
            "#,
        )
        .expect("config should parse");

        assert_eq!(cfg.realm, "lab");
        assert_eq!(cfg.token_ttl_ms, 6_000);
        assert_eq!(cfg.ack_timeout_ms, NodeConfig::default().ack_timeout_ms);
        assert_eq!(cfg.default_property.max_threshold, 9);
        assert_eq!(cfg.default_property.ack_mode, AckMode::Destination);
        assert_eq!(
            cfg.default_property.cache_policy,
            CachePolicy::reject(CacheOrder::Filo)
        );
    }

    #[test]
    fn refresh_must_be_shorter_than_ttl() {
        let cfg = NodeConfig {
            token_ttl_ms: 3_000,
            token_refresh_ms: 3_000,
            ..NodeConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Invalid(
                "token_refresh_ms must be positive and below token_ttl_ms"
            ))
        );
    }

    #[test]
    fn zero_lock_timeout_is_rejected() {
        let cfg = NodeConfig {
            lock_timeout_ms: 0,
            ..NodeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            NodeConfig::from_toml_str("token_ttl_ms = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }
}

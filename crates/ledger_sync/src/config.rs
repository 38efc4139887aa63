//! Runtime configuration for the sync engine

use crate::backoff::BackoffPolicy;
use ledger_config::SyncSettings;
use std::time::Duration;

/// Configuration for the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Retry delay policy for failed remote writes
    pub backoff: BackoffPolicy,

    /// Failed attempts after which an entry is dropped (default: 3)
    pub max_retries: u32,

    /// Background full refresh interval (default: 5 minutes)
    pub refresh_interval: Duration,

    /// Upper bound for a single remote call (default: 10 seconds)
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl SyncConfig {
    /// Build from the `[sync]` section of `config.toml`
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(settings.base_delay_ms),
                max_delay: Duration::from_millis(settings.max_delay_ms),
                jitter: Duration::from_millis(settings.jitter_ms),
            },
            max_retries: settings.max_retries,
            refresh_interval: Duration::from_secs(settings.refresh_interval_secs),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_retries == 0 {
            return Err(crate::SyncError::ConfigError(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            return Err(crate::SyncError::ConfigError(
                "base_delay cannot exceed max_delay".to_string(),
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(crate::SyncError::ConfigError(
                "refresh_interval must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(crate::SyncError::ConfigError(
                "request_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff.base_delay, Duration::from_millis(1_000));
        assert_eq!(config.backoff.max_delay, Duration::from_millis(30_000));
        assert_eq!(config.backoff.jitter, Duration::from_millis(1_000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = SyncConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Filter timing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Seven days.
pub const DEFAULT_AD_ATTRIBUTION_EXPIRATION_SECS: u64 = 7 * 24 * 60 * 60;
/// Thirty minutes.
pub const DEFAULT_OFF_SITE_GRACE_SECS: u64 = 30 * 60;
pub const DEFAULT_NOTIFICATION_INTERVAL_MS: u64 = 1000;
/// Upper bound for every configured duration: about a hundred years.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{0} must not exceed {MAX_DURATION_SECS} seconds")]
    DurationTooLarge(&'static str),
}

/// Time windows used by the attribution tracker and the notification batcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// How long an ad click stays attributable.
    pub ad_attribution_expiration_secs: u64,
    /// How long the user may browse away from the landing site and still return.
    pub off_site_grace_secs: u64,
    /// Minimum gap between two observer notification flushes.
    pub notification_interval_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ad_attribution_expiration_secs: DEFAULT_AD_ATTRIBUTION_EXPIRATION_SECS,
            off_site_grace_secs: DEFAULT_OFF_SITE_GRACE_SECS,
            notification_interval_ms: DEFAULT_NOTIFICATION_INTERVAL_MS,
        }
    }
}

impl FilterConfig {
    /// Parse from JSON. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ad_attribution_expiration_secs == 0 {
            return Err(ConfigError::ZeroDuration("ad_attribution_expiration_secs"));
        }
        if self.notification_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("notification_interval_ms"));
        }
        if self.ad_attribution_expiration_secs > MAX_DURATION_SECS {
            return Err(ConfigError::DurationTooLarge("ad_attribution_expiration_secs"));
        }
        if self.off_site_grace_secs > MAX_DURATION_SECS {
            return Err(ConfigError::DurationTooLarge("off_site_grace_secs"));
        }
        if self.notification_interval_ms / 1000 > MAX_DURATION_SECS {
            return Err(ConfigError::DurationTooLarge("notification_interval_ms"));
        }
        Ok(())
    }

    pub fn ad_attribution_expiration(&self) -> Duration {
        Duration::from_secs(self.ad_attribution_expiration_secs)
    }

    pub fn off_site_grace(&self) -> Duration {
        Duration::from_secs(self.off_site_grace_secs)
    }

    pub fn notification_interval(&self) -> Duration {
        Duration::from_millis(self.notification_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FilterConfig::default();
        assert_eq!(config.ad_attribution_expiration(), Duration::from_secs(604_800));
        assert_eq!(config.off_site_grace(), Duration::from_secs(1_800));
        assert_eq!(config.notification_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = FilterConfig::from_json(r#"{"off_site_grace_secs": 60}"#).expect("valid config");
        assert_eq!(config.off_site_grace_secs, 60);
        assert_eq!(config.notification_interval_ms, DEFAULT_NOTIFICATION_INTERVAL_MS);
    }

    #[test]
    fn test_rejects_zero_interval() {
        let err = FilterConfig::from_json(r#"{"notification_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration("notification_interval_ms")));
    }

    #[test]
    fn test_rejects_oversized_durations() {
        let err = FilterConfig::from_json(r#"{"ad_attribution_expiration_secs": 18446744073709551615}"#).unwrap_err();
        assert!(matches!(err, ConfigError::DurationTooLarge("ad_attribution_expiration_secs")));

        let err = FilterConfig::from_json(r#"{"off_site_grace_secs": 18446744073709551615}"#).unwrap_err();
        assert!(matches!(err, ConfigError::DurationTooLarge("off_site_grace_secs")));

        let err = FilterConfig::from_json(r#"{"notification_interval_ms": 18446744073709551615}"#).unwrap_err();
        assert!(matches!(err, ConfigError::DurationTooLarge("notification_interval_ms")));

        let at_limit = format!(r#"{{"off_site_grace_secs": {MAX_DURATION_SECS}}}"#);
        assert!(FilterConfig::from_json(&at_limit).is_ok());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(FilterConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}

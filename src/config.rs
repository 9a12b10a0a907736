//! Reporter configuration
//!
//! Defaults follow the liveness protocol: a heartbeat every 10 seconds and a
//! 10 second grace period before a silent run is classified as failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default grace period added to a check-in's expiry.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Liveness reporter settings for write-mode runs.
///
/// Deserializes from JSON with every field optional:
///
/// ```rust
/// use std::time::Duration;
/// use trueno_tracker::config::ReporterConfig;
///
/// let config: ReporterConfig =
///     serde_json::from_str(r#"{"heartbeat_interval": 2.5}"#).unwrap();
/// assert_eq!(config.heartbeat_interval(), Duration::from_millis(2500));
/// assert!(config.enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    enabled: bool,
    #[serde(with = "duration_secs")]
    heartbeat_interval: Duration,
    #[serde(with = "duration_secs")]
    grace_period: Duration,
}

impl ReporterConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the reporter for write-mode runs.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the heartbeat period (clamped to at least 1 ms).
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the grace period used when classifying run health.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Whether write-mode runs get a reporter.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Grace period.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// `next_expected_in` written by each heartbeat tick: the period rounded up
    /// to whole seconds, at least 1.
    #[must_use]
    pub fn heartbeat_expect_next_in(&self) -> u64 {
        let interval = self.heartbeat_interval;
        (interval.as_secs() + u64::from(interval.subsec_nanos() > 0)).max(1)
    }
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// `Duration` as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

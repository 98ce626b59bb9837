//! Configuration for the worker transport.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Program used to run the guest module out of process when no command
/// is configured.
pub const DEFAULT_RUNNER: &str = "wasmtime";

/// Readiness line the packaged guest prints on stderr once its rules are
/// loaded.
pub const DEFAULT_READY_MARKER: &str = "Ready.";

/// Configuration for a [`SubprocessChannel`](crate::SubprocessChannel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Program and arguments of the worker.
    pub command: Vec<String>,

    /// How long a call waits for the first output line.
    ///
    /// Defaults to 5 seconds.
    #[serde(with = "millis", rename = "response_timeout_ms")]
    pub response_timeout: Duration,

    /// How long the worker may take to exit after SIGTERM before it is
    /// killed.
    ///
    /// Defaults to 5 seconds.
    #[serde(with = "millis", rename = "grace_period_ms")]
    pub grace_period: Duration,

    /// Liveness probe interval of the monitor thread.
    #[serde(with = "millis", rename = "monitor_interval_ms")]
    pub monitor_interval: Duration,

    /// Upper bound on joining the monitor thread at teardown.
    #[serde(with = "millis", rename = "monitor_join_timeout_ms")]
    pub monitor_join_timeout: Duration,

    /// Stderr text that signals the worker is ready for calls.
    pub ready_marker: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            response_timeout: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
            monitor_interval: Duration::from_millis(100),
            monitor_join_timeout: Duration::from_secs(1),
            ready_marker: None,
        }
    }
}

impl DaemonConfig {
    /// Create a configuration running `command`.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the termination grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the monitor probe interval.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Set the monitor join bound.
    pub fn with_monitor_join_timeout(mut self, timeout: Duration) -> Self {
        self.monitor_join_timeout = timeout;
        self
    }

    /// Wait for `marker` on stderr before accepting calls.
    pub fn with_ready_marker(mut self, marker: impl Into<String>) -> Self {
        self.ready_marker = Some(marker.into());
        self
    }
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert!(config.command.is_empty());
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.monitor_join_timeout, Duration::from_secs(1));
        assert!(config.ready_marker.is_none());
    }

    #[test]
    fn test_builder() {
        let config = DaemonConfig::new(["wasmtime", "run", "suola.wasm"])
            .with_response_timeout(Duration::from_millis(500))
            .with_ready_marker(DEFAULT_READY_MARKER);
        assert_eq!(config.command, vec!["wasmtime", "run", "suola.wasm"]);
        assert_eq!(config.response_timeout, Duration::from_millis(500));
        assert_eq!(config.ready_marker.as_deref(), Some("Ready."));
    }

    #[test]
    fn test_toml_uses_milliseconds() {
        let config: DaemonConfig = toml::from_str(
            r#"
            command = ["cat"]
            response_timeout_ms = 250
            grace_period_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.command, vec!["cat"]);
        assert_eq!(config.response_timeout, Duration::from_millis(250));
        assert_eq!(config.grace_period, Duration::from_secs(1));
        assert_eq!(config.monitor_interval, Duration::from_millis(100));

        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("response_timeout_ms = 250"));
    }
}

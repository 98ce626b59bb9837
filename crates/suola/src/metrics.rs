//! Call metrics for the signature service.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How a single call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// A signature was returned.
    Signature,
    /// The rule engine had no signature for the URL.
    DomainMiss,
    /// The input was rejected before reaching the transport.
    InputRejected,
    /// The transport failed (boundary fault, timeout, dead worker).
    TransportFailure,
}

/// Collects per-call counters and latency.
#[derive(Default)]
pub struct ServiceMetrics {
    inner: RwLock<MetricsSnapshot>,
}

impl ServiceMetrics {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished call.
    pub fn record(&self, outcome: CallOutcome, elapsed: Duration) {
        let mut metrics = self.inner.write();
        metrics.calls += 1;
        metrics.total_latency += elapsed;
        match outcome {
            CallOutcome::Signature => metrics.signatures += 1,
            CallOutcome::DomainMiss => metrics.domain_misses += 1,
            CallOutcome::InputRejected => metrics.input_rejections += 1,
            CallOutcome::TransportFailure => metrics.transport_failures += 1,
        }
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.read().clone()
    }

    /// Reset all counters.
    pub fn reset(&self) {
        *self.inner.write() = MetricsSnapshot::default();
    }
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServiceMetrics")
            .field(&*self.inner.read())
            .finish()
    }
}

/// Snapshot of collected metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Calls that reached the service.
    pub calls: u64,
    /// Calls that produced a signature.
    pub signatures: u64,
    /// Calls the rule engine declined.
    pub domain_misses: u64,
    /// Calls rejected for bad input.
    pub input_rejections: u64,
    /// Calls that failed in the transport.
    pub transport_failures: u64,
    /// Sum of call latencies.
    #[serde(with = "duration_serde")]
    pub total_latency: Duration,
}

impl MetricsSnapshot {
    /// Mean latency per call, zero when no calls were made.
    pub fn mean_latency(&self) -> Duration {
        match u32::try_from(self.calls) {
            Ok(0) => Duration::ZERO,
            Ok(calls) => self.total_latency / calls,
            Err(_) => Duration::from_secs_f64(self.total_latency.as_secs_f64() / self.calls as f64),
        }
    }
}

/// Custom serde for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_nanos())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}

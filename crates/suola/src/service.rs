//! The signature service facade.

use std::time::Instant;

use suola_guest::GuestInvoker;
use tracing::{debug, error, info};

use crate::config::{ServiceConfig, TransportKind};
use crate::error::{ErrorKind, Result, SignatureError};
use crate::metrics::{CallOutcome, ServiceMetrics};
use crate::transport::{DaemonTransport, SignatureTransport};

/// Best-effort URL signatures over a configured transport.
///
/// The service is `Send + Sync` and meant to be shared. Calls are
/// serialized by the transport.
pub struct SignatureService {
    transport: Box<dyn SignatureTransport>,
    metrics: ServiceMetrics,
}

impl SignatureService {
    /// Build the transport named by `config`.
    ///
    /// Construction either fully succeeds or returns the error; no
    /// half-initialized transport is kept.
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let service = match config.transport {
            TransportKind::Guest => Self::from_transport(GuestInvoker::new(config.guest)?),
            TransportKind::Daemon => {
                Self::from_transport(DaemonTransport::spawn(config.resolved_daemon()?)?)
            }
        };
        info!(transport = service.transport_name(), "Signature service ready");
        Ok(service)
    }

    /// Wrap an existing transport.
    pub fn from_transport(transport: impl SignatureTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            metrics: ServiceMetrics::new(),
        }
    }

    /// Name of the active transport.
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// The signature of `url`, or `None` when there is none to give.
    ///
    /// Only input errors are returned. A URL without a matching rule
    /// yields `None`. Transport faults are logged at error level and also
    /// yield `None`.
    pub fn signature_of(&self, url: &str) -> Result<Option<String>> {
        match self.try_signature_of(url) {
            Ok(signature) => Ok(Some(signature)),
            Err(err) => match err.kind() {
                ErrorKind::Input => Err(err),
                ErrorKind::Domain => {
                    debug!(url, reason = %err, "No signature");
                    Ok(None)
                }
                kind => {
                    error!(url, ?kind, error = %err, transport = self.transport_name(), "Signature call failed");
                    Ok(None)
                }
            },
        }
    }

    /// The signature of `url`, with every failure returned.
    pub fn try_signature_of(&self, url: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.call(url.trim());

        let outcome = match &result {
            Ok(_) => CallOutcome::Signature,
            Err(err) => match err.kind() {
                ErrorKind::Input => CallOutcome::InputRejected,
                ErrorKind::Domain => CallOutcome::DomainMiss,
                ErrorKind::Resource | ErrorKind::Boundary | ErrorKind::Timeout => {
                    CallOutcome::TransportFailure
                }
            },
        };
        self.metrics.record(outcome, started.elapsed());
        result
    }

    /// Call metrics collected so far.
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    fn call(&self, url: &str) -> Result<String> {
        if url.is_empty() {
            return Err(SignatureError::EmptyInput);
        }
        let signature = self.transport.signature(url)?;
        if signature.is_empty() {
            return Err(SignatureError::NoSignature("empty signature".to_string()));
        }
        debug!(url, transport = self.transport_name(), "Signed");
        Ok(signature)
    }
}

impl std::fmt::Debug for SignatureService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureService")
            .field("transport", &self.transport_name())
            .field("metrics", &self.metrics)
            .finish()
    }
}

//! Transports that turn a URL into a signature.

use suola_daemon::{DaemonConfig, Request, SubprocessChannel};
use suola_guest::{GuestExports, GuestInvoker};
use tracing::debug;

use crate::error::{Result, SignatureError};

/// Something that can compute the signature of a URL.
///
/// Implementations must serialize calls internally. The service shares
/// one transport across all caller threads.
pub trait SignatureTransport: Send + Sync {
    /// Compute the signature of `url`.
    ///
    /// `url` is already trimmed and non-empty.
    fn signature(&self, url: &str) -> Result<String>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

impl<G: GuestExports + Send> SignatureTransport for GuestInvoker<G> {
    fn signature(&self, url: &str) -> Result<String> {
        Ok(GuestInvoker::signature(self, url)?)
    }

    fn name(&self) -> &'static str {
        "guest"
    }
}

/// Out-of-process transport over a [`SubprocessChannel`].
///
/// Each URL is sent as one positional line. The worker answers with
/// `Signature: <hex>`, `Error: <message>`, or the bare signature.
#[derive(Debug)]
pub struct DaemonTransport {
    channel: SubprocessChannel,
}

impl DaemonTransport {
    /// Spawn the worker described by `config`.
    pub fn spawn(config: DaemonConfig) -> Result<Self> {
        Ok(Self::from_channel(SubprocessChannel::spawn(config)?))
    }

    /// Wrap an already running channel.
    pub fn from_channel(channel: SubprocessChannel) -> Self {
        Self { channel }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &SubprocessChannel {
        &self.channel
    }
}

impl SignatureTransport for DaemonTransport {
    fn signature(&self, url: &str) -> Result<String> {
        let response = self.channel.invoke(&Request::new().arg(url))?;
        debug!(pid = self.channel.pid(), len = response.len(), "Worker responded");
        parse_response(&response)
    }

    fn name(&self) -> &'static str {
        "daemon"
    }
}

const SIGNATURE_PREFIX: &str = "Signature:";
const ERROR_PREFIX: &str = "Error:";

/// Extract the signature from a worker response.
///
/// Tagged lines win over anything else in the payload. An untagged
/// payload of a single line is the signature itself.
pub fn parse_response(response: &str) -> Result<String> {
    for line in response.lines().map(str::trim) {
        if let Some(signature) = line.strip_prefix(SIGNATURE_PREFIX) {
            return Ok(signature.trim().to_string());
        }
        if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
            return Err(SignatureError::NoSignature(message.trim().to_string()));
        }
    }

    let bare = response.trim();
    if !bare.is_empty() && !bare.contains('\n') {
        return Ok(bare.to_string());
    }
    Err(SignatureError::UnexpectedResponse(response.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn test_tagged_signature() {
        let parsed = parse_response(&format!("Signature: {DIGEST}")).unwrap();
        assert_eq!(parsed, DIGEST);
    }

    #[test]
    fn test_tagged_error() {
        let err = parse_response("Error: no matching rule").unwrap_err();
        assert!(matches!(err, SignatureError::NoSignature(ref msg) if msg == "no matching rule"));
        assert!(err.is_domain());
    }

    #[test]
    fn test_tag_found_among_other_lines() {
        let payload = format!("loading\nSignature: {DIGEST}\n");
        assert_eq!(parse_response(&payload).unwrap(), DIGEST);
    }

    #[test]
    fn test_bare_digest() {
        assert_eq!(parse_response(DIGEST).unwrap(), DIGEST);
    }

    #[test]
    fn test_bare_single_line_is_signature() {
        assert_eq!(parse_response("  abc123 \n").unwrap(), "abc123");
    }

    #[test]
    fn test_untagged_multiline_payload() {
        let err = parse_response("first\nsecond").unwrap_err();
        assert!(matches!(err, SignatureError::UnexpectedResponse(_)));
    }
}

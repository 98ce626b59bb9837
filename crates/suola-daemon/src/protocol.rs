//! Line framing of worker requests.
//!
//! A request is one line per value: positional values as-is, named values
//! as `key=value`. The whole request is newline-terminated and written in
//! one go. A request with no values is a single empty line.

use crate::error::{DaemonError, DaemonResult};

/// A request to the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    positional: Vec<String>,
    named: Vec<(String, String)>,
}

impl Request {
    /// Create an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional value.
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Append a named value.
    pub fn named(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.named.push((key.into(), value.into()));
        self
    }

    /// Positional values in order.
    pub fn positional(&self) -> &[String] {
        &self.positional
    }

    /// Named values in order.
    pub fn named_args(&self) -> &[(String, String)] {
        &self.named
    }

    /// Whether the request carries no values.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    /// Encode into the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::InvalidArgument`] for values containing a line
    /// break, and for keys that are empty or contain `=`.
    pub fn encode(&self) -> DaemonResult<String> {
        if self.is_empty() {
            return Ok("\n".to_string());
        }

        let mut out = String::new();
        for value in &self.positional {
            check_single_line(value)?;
            out.push_str(value);
            out.push('\n');
        }
        for (key, value) in &self.named {
            if key.is_empty() || key.contains('=') {
                return Err(DaemonError::InvalidArgument(format!("bad key {key:?}")));
            }
            check_single_line(key)?;
            check_single_line(value)?;
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        Ok(out)
    }
}

fn check_single_line(value: &str) -> DaemonResult<()> {
    if value.contains(['\n', '\r']) {
        return Err(DaemonError::InvalidArgument(format!(
            "{value:?} contains a line break"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_request_is_blank_line() {
        assert_eq!(Request::new().encode().unwrap(), "\n");
    }

    #[test]
    fn test_positional_then_named() {
        let request = Request::new()
            .arg("https://example.com/a")
            .named("sign", "true")
            .arg("second");
        assert_eq!(
            request.encode().unwrap(),
            "https://example.com/a\nsecond\nsign=true\n"
        );
    }

    #[test]
    fn test_embedded_newline_rejected() {
        let request = Request::new().arg("a\nb");
        assert!(matches!(request.encode(), Err(DaemonError::InvalidArgument(_))));

        let request = Request::new().named("k", "v\r");
        assert!(matches!(request.encode(), Err(DaemonError::InvalidArgument(_))));
    }

    #[test]
    fn test_bad_keys_rejected() {
        assert!(Request::new().named("", "v").encode().is_err());
        assert!(Request::new().named("a=b", "v").encode().is_err());
    }

    #[test]
    fn test_values_may_contain_equals() {
        let request = Request::new().named("url", "https://q.example/?id=1");
        assert_eq!(request.encode().unwrap(), "url=https://q.example/?id=1\n");
    }
}

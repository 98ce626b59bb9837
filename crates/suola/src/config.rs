//! Service configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use suola_daemon::{DEFAULT_READY_MARKER, DEFAULT_RUNNER, DaemonConfig};
use suola_guest::{GuestConfig, GuestError, RuleSource, locate_module};

use crate::error::{Result, SignatureError};

/// Which transport computes signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Wasmtime instance inside this process.
    #[default]
    Guest,
    /// The guest module running in a supervised worker process.
    Daemon,
}

/// Configuration for a [`SignatureService`](crate::SignatureService).
///
/// ```toml
/// transport = "guest"
///
/// [guest]
/// rule_source = "/etc/suola/rules.yaml"
///
/// [daemon]
/// response_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Selected transport.
    pub transport: TransportKind,
    /// In-process transport settings. The module and rule source are
    /// shared with the daemon transport's default command.
    pub guest: GuestConfig,
    /// Out-of-process transport settings.
    pub daemon: DaemonConfig,
}

impl ServiceConfig {
    /// Create a configuration using the guest transport with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SignatureError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Select the transport.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Set the guest settings.
    pub fn with_guest(mut self, guest: GuestConfig) -> Self {
        self.guest = guest;
        self
    }

    /// Set the worker settings.
    pub fn with_daemon(mut self, daemon: DaemonConfig) -> Self {
        self.daemon = daemon;
        self
    }

    /// Worker settings with the default command filled in.
    ///
    /// An empty command becomes `wasmtime run [--dir <rule dir>] <module>
    /// [<rule path>]`, waiting for the guest's ready line.
    pub fn resolved_daemon(&self) -> Result<DaemonConfig> {
        let mut daemon = self.daemon.clone();
        if !daemon.command.is_empty() {
            return Ok(daemon);
        }

        let module = match &self.guest.module_path {
            Some(path) => path.clone(),
            None => locate_module().map_err(GuestError::from)?,
        };
        let rule_source = self
            .guest
            .rule_source
            .as_ref()
            .map(RuleSource::resolve)
            .transpose()
            .map_err(GuestError::from)?;

        daemon.command = default_command(&module, rule_source.as_ref());
        if daemon.ready_marker.is_none() {
            daemon.ready_marker = Some(DEFAULT_READY_MARKER.to_string());
        }
        Ok(daemon)
    }
}

fn default_command(module: &Path, rule_source: Option<&RuleSource>) -> Vec<String> {
    let mut command = vec![DEFAULT_RUNNER.to_string(), "run".to_string()];
    if let Some(source) = rule_source {
        command.push("--dir".to_string());
        command.push(source.dir().display().to_string());
    }
    command.push(module.display().to_string());
    if let Some(source) = rule_source {
        command.push(source.path().display().to_string());
    }
    command
}

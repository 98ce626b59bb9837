//! Subcommands and the service setup they share.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::info;

use suola::prelude::*;

use crate::OutputFormat;

pub mod check;
pub mod locate;
pub mod sign;

/// Transport selection on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TransportArg {
    /// In-process Wasmtime guest
    Guest,
    /// Supervised worker process
    Daemon,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Guest => TransportKind::Guest,
            TransportArg::Daemon => TransportKind::Daemon,
        }
    }
}

/// Options that override the configuration file.
#[derive(Args, Debug, Default)]
pub struct ServiceArgs {
    /// Path to the guest module (default: probe standard locations)
    #[arg(short, long)]
    pub module: Option<PathBuf>,

    /// Rule-source file granted to the guest
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// Transport to use
    #[arg(short, long)]
    pub transport: Option<TransportArg>,
}

impl ServiceArgs {
    /// Load the configuration file, if any, and apply the overrides.
    pub fn resolve(&self, config_path: Option<&Path>) -> Result<ServiceConfig> {
        let mut config = match config_path {
            Some(path) => ServiceConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ServiceConfig::default(),
        };

        if let Some(module) = &self.module {
            config.guest.module_path = Some(module.clone());
        }
        if let Some(rules) = &self.rules {
            config.guest.rule_source = Some(rules.clone());
        }
        if let Some(transport) = self.transport {
            config.transport = transport.into();
        }
        Ok(config)
    }

    /// Build the signature service.
    pub fn build(&self, config_path: Option<&Path>) -> Result<SignatureService> {
        let config = self.resolve(config_path)?;
        info!(transport = ?config.transport, "Starting signature service");
        SignatureService::new(config).context("Failed to start signature service")
    }
}

/// Print `value` as JSON in the requested format.
pub fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::JsonCompact => println!("{}", serde_json::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_without_config_file() {
        let args = ServiceArgs {
            module: Some(PathBuf::from("/opt/suola/suola.wasm")),
            rules: Some(PathBuf::from("rules.yaml")),
            transport: Some(TransportArg::Daemon),
        };
        let config = args.resolve(None).unwrap();
        assert_eq!(config.transport, TransportKind::Daemon);
        assert_eq!(
            config.guest.module_path.as_deref(),
            Some(Path::new("/opt/suola/suola.wasm"))
        );
        assert_eq!(config.guest.rule_source.as_deref(), Some(Path::new("rules.yaml")));
    }

    #[test]
    fn test_overrides_win_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suola.toml");
        std::fs::write(
            &path,
            "transport = \"daemon\"\n[guest]\nrule_source = \"/etc/suola/rules.yaml\"\n",
        )
        .unwrap();

        let args = ServiceArgs {
            transport: Some(TransportArg::Guest),
            ..ServiceArgs::default()
        };
        let config = args.resolve(Some(&path)).unwrap();
        assert_eq!(config.transport, TransportKind::Guest);
        assert_eq!(
            config.guest.rule_source.as_deref(),
            Some(Path::new("/etc/suola/rules.yaml"))
        );
    }

    #[test]
    fn test_missing_config_file() {
        let err = ServiceArgs::default()
            .resolve(Some(Path::new("/nonexistent/suola.toml")))
            .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/suola.toml"));
    }
}

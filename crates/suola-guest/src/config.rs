//! Configuration for the in-process guest transport.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for a [`GuestInvoker`](crate::GuestInvoker).
///
/// Controls where the guest module comes from, which rule source it is
/// granted, and the limits of the underlying Wasmtime engine and store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    /// Explicit module path. When unset, the module is located by probing
    /// the standard candidate locations.
    pub module_path: Option<PathBuf>,

    /// Optional external rule source granted to the guest.
    ///
    /// Only its containing directory is exposed to the sandbox.
    pub rule_source: Option<PathBuf>,

    /// Maximum guest linear memory in bytes.
    ///
    /// Defaults to 256MB.
    pub max_memory_bytes: usize,

    /// Maximum WASM stack size in bytes.
    ///
    /// Defaults to 1MB.
    pub max_wasm_stack: usize,

    /// Pass guest stderr through to the host's stderr.
    pub inherit_stderr: bool,

    /// Run the guest's `_start` export once after instantiation.
    pub run_startup: bool,

    /// Enable debug information in compiled code.
    pub debug_info: bool,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            module_path: None,
            rule_source: None,
            max_memory_bytes: 256 * 1024 * 1024, // 256MB
            max_wasm_stack: 1024 * 1024,         // 1MB
            inherit_stderr: true,
            run_startup: true,
            debug_info: false,
        }
    }
}

impl GuestConfig {
    /// Create a new guest configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit module file instead of probing.
    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path = Some(path.into());
        self
    }

    /// Grant the guest an external rule source.
    pub fn with_rule_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.rule_source = Some(path.into());
        self
    }

    /// Set the guest memory ceiling.
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Set the maximum WASM stack size.
    pub fn with_max_wasm_stack(mut self, bytes: usize) -> Self {
        self.max_wasm_stack = bytes;
        self
    }

    /// Enable or disable stderr passthrough.
    pub fn with_inherit_stderr(mut self, enabled: bool) -> Self {
        self.inherit_stderr = enabled;
        self
    }

    /// Enable or disable the startup export call.
    pub fn with_startup(mut self, enabled: bool) -> Self {
        self.run_startup = enabled;
        self
    }

    /// Enable debug information.
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_config_defaults() {
        let config = GuestConfig::default();
        assert!(config.module_path.is_none());
        assert!(config.rule_source.is_none());
        assert_eq!(config.max_wasm_stack, 1024 * 1024);
        assert!(config.inherit_stderr);
        assert!(config.run_startup);
    }

    #[test]
    fn test_guest_config_builder() {
        let config = GuestConfig::new()
            .with_module_path("/opt/suola.wasm")
            .with_rule_source("/etc/suola/rules.yaml")
            .with_max_memory(32 * 1024 * 1024)
            .with_startup(false);

        assert_eq!(config.module_path, Some(PathBuf::from("/opt/suola.wasm")));
        assert_eq!(
            config.rule_source,
            Some(PathBuf::from("/etc/suola/rules.yaml"))
        );
        assert_eq!(config.max_memory_bytes, 32 * 1024 * 1024);
        assert!(!config.run_startup);
    }
}

//! Wasmtime engine wrapper.
//!
//! The engine is compiled once and may be shared by several invokers; each
//! invoker still owns its own store and instance.

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine};

use crate::config::GuestConfig;
use crate::error::{EngineError, EngineResult};

/// The Wasmtime engine used to compile and run the guest module.
///
/// # Example
///
/// ```
/// use suola_guest::{GuestConfig, GuestEngine};
///
/// let engine = GuestEngine::new(&GuestConfig::default()).unwrap();
/// ```
pub struct GuestEngine {
    /// The underlying Wasmtime engine.
    inner: Engine,
    /// Stack ceiling the engine was built with.
    max_wasm_stack: usize,
}

impl GuestEngine {
    /// Create an engine configured from the given guest configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack limit is zero or Wasmtime rejects the
    /// configuration.
    pub fn new(config: &GuestConfig) -> EngineResult<Self> {
        if config.max_wasm_stack == 0 {
            return Err(EngineError::InvalidConfig(
                "max_wasm_stack must be non-zero".to_string(),
            ));
        }

        let mut wasmtime_config = Config::new();
        wasmtime_config.max_wasm_stack(config.max_wasm_stack);
        wasmtime_config.debug_info(config.debug_info);

        // The guest toolchain emits bulk-memory and multi-value code
        wasmtime_config.wasm_bulk_memory(true);
        wasmtime_config.wasm_multi_value(true);
        wasmtime_config.wasm_reference_types(true);
        wasmtime_config.wasm_simd(true);

        let inner = Engine::new(&wasmtime_config)?;

        info!(
            max_wasm_stack = config.max_wasm_stack,
            debug_info = config.debug_info,
            "Created guest engine"
        );

        Ok(Self {
            inner,
            max_wasm_stack: config.max_wasm_stack,
        })
    }

    /// Create an engine with default configuration.
    pub fn default_engine() -> EngineResult<Self> {
        Self::new(&GuestConfig::default())
    }

    /// Get a reference to the underlying Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.inner
    }

    /// The configured WASM stack ceiling.
    pub fn max_wasm_stack(&self) -> usize {
        self.max_wasm_stack
    }
}

impl std::fmt::Debug for GuestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestEngine")
            .field("max_wasm_stack", &self.max_wasm_stack)
            .finish()
    }
}

/// A shared reference to a guest engine.
pub type SharedEngine = Arc<GuestEngine>;

/// Extension trait for creating shared engines.
pub trait IntoShared {
    /// Convert into a shared engine reference.
    fn into_shared(self) -> SharedEngine;
}

impl IntoShared for GuestEngine {
    fn into_shared(self) -> SharedEngine {
        Arc::new(self)
    }
}

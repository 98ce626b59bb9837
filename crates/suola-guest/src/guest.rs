//! The instantiated guest module.
//!
//! [`WasmtimeGuest`] owns the store, the instance's memory, and typed
//! handles to the contract exports. It is created once per invoker and
//! implements [`GuestExports`] for the memory pool.

use tracing::{debug, error, info, warn};
use wasmtime::{Linker, Memory, Store, StoreLimits, StoreLimitsBuilder, TypedFunc};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};

use crate::config::GuestConfig;
use crate::engine::SharedEngine;
use crate::error::{ModuleError, ModuleResult};
use crate::memory::{GuestExports, describe_failure};
use crate::module::{
    ALLOCATE_EXPORT, MEMORY_EXPORT, RELEASE_EXPORT, SIGNATURE_EXPORT, STARTUP_EXPORT,
    ValidatedModule,
};
use crate::wasi::{RuleSource, build_wasi_ctx};

/// Data stored in the Wasmtime store.
pub struct GuestState {
    /// WASI preview1 context holding the capability grant.
    wasi: WasiP1Ctx,
    /// Resource limits.
    limits: StoreLimits,
}

/// How the guest's startup export finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// The guest has no startup export, or it was disabled.
    Skipped,
    /// The startup export returned or exited with code 0.
    Completed,
    /// The startup export exited with a nonzero code.
    Exited(i32),
    /// The startup export trapped.
    Faulted(String),
}

/// A live guest instance bound to its store.
pub struct WasmtimeGuest {
    store: Store<GuestState>,
    memory: Memory,
    malloc: TypedFunc<u32, u32>,
    free: TypedFunc<u32, ()>,
    get_signature: TypedFunc<(u32, u32), u64>,
    startup: StartupOutcome,
}

impl WasmtimeGuest {
    /// Instantiate `module` in a fresh store.
    ///
    /// The startup export, if present and enabled, runs exactly once. A
    /// nonzero exit or trap there is logged and recorded but does not fail
    /// construction.
    ///
    /// # Errors
    ///
    /// Returns an error if WASI setup, linking, or instantiation fails, or
    /// if a contract export cannot be bound.
    pub fn instantiate(
        engine: &SharedEngine,
        module: &ValidatedModule,
        config: &GuestConfig,
        rule_source: Option<&RuleSource>,
    ) -> ModuleResult<Self> {
        let wasi = build_wasi_ctx(rule_source, config.inherit_stderr)?;
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes)
            .instances(1)
            .build();

        let mut store = Store::new(engine.inner(), GuestState { wasi, limits });
        store.limiter(|state| &mut state.limits);

        let mut linker: Linker<GuestState> = Linker::new(engine.inner());
        preview1::add_to_linker_sync(&mut linker, |state: &mut GuestState| &mut state.wasi)
            .map_err(|e| ModuleError::Wasi(e.to_string()))?;

        let instance = linker.instantiate(&mut store, module.inner())?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or(ModuleError::MissingExport {
                name: MEMORY_EXPORT,
                expected: "memory",
            })?;
        let malloc = instance
            .get_typed_func::<u32, u32>(&mut store, ALLOCATE_EXPORT)
            .map_err(|_| ModuleError::MissingExport {
                name: ALLOCATE_EXPORT,
                expected: "func (i32) -> i32",
            })?;
        let free = instance
            .get_typed_func::<u32, ()>(&mut store, RELEASE_EXPORT)
            .map_err(|_| ModuleError::MissingExport {
                name: RELEASE_EXPORT,
                expected: "func (i32)",
            })?;
        let get_signature = instance
            .get_typed_func::<(u32, u32), u64>(&mut store, SIGNATURE_EXPORT)
            .map_err(|_| ModuleError::MissingExport {
                name: SIGNATURE_EXPORT,
                expected: "func (i32, i32) -> i64",
            })?;

        let startup = if config.run_startup && module.has_startup() {
            let start = instance
                .get_typed_func::<(), ()>(&mut store, STARTUP_EXPORT)
                .map_err(|_| ModuleError::MissingExport {
                    name: STARTUP_EXPORT,
                    expected: "func ()",
                })?;
            run_startup(&mut store, &start)
        } else {
            StartupOutcome::Skipped
        };

        info!(
            module_name = ?module.name(),
            links_wasi = module.links_wasi(),
            memory_bytes = memory.data_size(&store),
            startup = ?startup,
            "Instantiated guest module"
        );

        Ok(Self {
            store,
            memory,
            malloc,
            free,
            get_signature,
            startup,
        })
    }

    /// How the startup export finished.
    pub fn startup(&self) -> &StartupOutcome {
        &self.startup
    }
}

fn run_startup(store: &mut Store<GuestState>, start: &TypedFunc<(), ()>) -> StartupOutcome {
    debug!("Running guest startup export");
    match start.call(&mut *store, ()) {
        Ok(()) => StartupOutcome::Completed,
        Err(err) => match err.downcast_ref::<wasmtime_wasi::I32Exit>() {
            Some(exit) if exit.0 == 0 => StartupOutcome::Completed,
            Some(exit) => {
                warn!(code = exit.0, "Guest startup exited with nonzero code");
                StartupOutcome::Exited(exit.0)
            }
            None => {
                let message = describe_failure(&err);
                error!(error = %message, "Guest startup faulted");
                StartupOutcome::Faulted(message)
            }
        },
    }
}

impl GuestExports for WasmtimeGuest {
    fn allocate(&mut self, size: u32) -> wasmtime::Result<u32> {
        self.malloc.call(&mut self.store, size)
    }

    fn release(&mut self, offset: u32) -> wasmtime::Result<()> {
        self.free.call(&mut self.store, offset)
    }

    fn compute_signature(&mut self, offset: u32, len: u32) -> wasmtime::Result<u64> {
        self.get_signature.call(&mut self.store, (offset, len))
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }
}

impl std::fmt::Debug for WasmtimeGuest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmtimeGuest")
            .field("memory_bytes", &self.memory.data_size(&self.store))
            .field("startup", &self.startup)
            .finish()
    }
}

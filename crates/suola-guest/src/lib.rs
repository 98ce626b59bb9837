//! Suola Guest - in-process signature transport
//!
//! This crate calls a sandboxed WebAssembly rule engine to compute URL
//! signatures. It includes:
//!
//! - [`GuestInvoker`]: The signature operation, one guest instance per invoker
//! - [`GuestMemoryPool`]: Bounds-checked marshaling across guest memory
//! - [`PackedResult`]: Decoding of the guest's packed 64-bit return value
//! - [`locate_module`]: Probing the standard module locations
//!
//! # Quick Start
//!
//! ```no_run
//! use suola_guest::prelude::*;
//!
//! let invoker = GuestInvoker::new(
//!     GuestConfig::default().with_rule_source("/etc/suola/rules.yaml"),
//! )?;
//! let signature = invoker.signature("https://example.com/test-article")?;
//! # Ok::<(), suola_guest::GuestError>(())
//! ```
//!
//! # Call Contract
//!
//! The guest module must export:
//!
//! | Export | Type |
//! |---|---|
//! | `Malloc` | `(size: i32) -> i32` |
//! | `Free` | `(offset: i32)` |
//! | `GetSignature` | `(offset: i32, len: i32) -> i64` |
//! | `memory` | linear memory |
//! | `_start` | optional, run once after instantiation |
//!
//! The host frees only the input buffer it allocated. The result buffer
//! belongs to the guest allocator.
//!
//! # Security Model
//!
//! 1. **Memory Isolation**: The host copies bytes in and out; no reference
//!    into guest memory outlives a call
//! 2. **Bounds Checking**: Every access is validated against the current
//!    memory size
//! 3. **Least Privilege**: At most one read-only directory is granted

pub mod config;
pub mod engine;
pub mod error;
pub mod guest;
pub mod invoker;
pub mod locate;
pub mod memory;
pub mod module;
pub mod packed;
pub mod wasi;

// Re-export main types at crate root
pub use config::GuestConfig;
pub use engine::{GuestEngine, IntoShared, SharedEngine};
pub use error::{
    BoundaryError, BoundaryResult, EngineError, GuestError, GuestResult, ModuleError,
    ModuleResult,
};
pub use guest::{GuestState, StartupOutcome, WasmtimeGuest};
pub use invoker::{GuestInvoker, InvokerId, MAX_URL_LENGTH};
pub use locate::{MODULE_ENV_VAR, MODULE_FILE_NAME, candidate_paths, locate_in, locate_module};
pub use memory::{GuestExports, GuestMemoryPool};
pub use module::{ExportInfo, ExportKind, ModuleLoader, ValidatedModule, WasmType};
pub use packed::PackedResult;
pub use wasi::RuleSource;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::GuestConfig;
    pub use crate::engine::{GuestEngine, IntoShared, SharedEngine};
    pub use crate::error::{GuestError, GuestResult};
    pub use crate::invoker::{GuestInvoker, MAX_URL_LENGTH};
    pub use crate::module::{ModuleLoader, ValidatedModule};
}

//! Error types for the in-process guest transport.
//!
//! Errors are split by the phase they originate in: engine setup, module
//! loading and wiring (construction time), and the memory boundary crossed
//! on every call. [`GuestError`] ties them together with the per-call input
//! and guest-reported outcomes.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the guest transport.
#[derive(Debug, Error)]
pub enum GuestError {
    /// The URL was empty.
    #[error("URL cannot be empty")]
    EmptyInput,

    /// The URL exceeds the protocol limit.
    #[error("URL too long: {len} bytes (max {max})")]
    InputTooLarge {
        /// Byte length of the rejected input.
        len: usize,
        /// The protocol limit.
        max: usize,
    },

    /// Error during engine creation.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Error while loading or wiring the guest module.
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// A fault on the host/guest memory boundary.
    #[error("Boundary error: {0}")]
    Boundary(#[from] BoundaryError),

    /// The guest completed the call but reported its own error, e.g. that
    /// no rule matched the URL.
    #[error("Guest reported: {0}")]
    GuestReported(String),
}

impl GuestError {
    /// Returns true if the error is the caller's fault.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::EmptyInput | Self::InputTooLarge { .. })
    }

    /// Returns true if the guest itself declined to produce a signature.
    pub fn is_guest_reported(&self) -> bool {
        matches!(self, Self::GuestReported(_))
    }
}

/// Errors during engine creation and configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid engine configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying Wasmtime error.
    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

/// Errors while locating, loading, and instantiating the guest module.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module file exists at any probed location.
    #[error("Guest module could not be found. Searched paths: {}", join_paths(.probed))]
    NotFound {
        /// Every location that was probed, in order.
        probed: Vec<PathBuf>,
    },

    /// The configured rule source does not exist.
    #[error("Rule source not found: {}", .0.display())]
    RuleSourceNotFound(PathBuf),

    /// The WASM module is invalid or malformed.
    #[error("Invalid WASM module: {0}")]
    Invalid(String),

    /// The module lacks an export the call contract requires.
    #[error("Missing guest export '{name}' ({expected})")]
    MissingExport {
        /// The export name.
        name: &'static str,
        /// What kind of export was expected.
        expected: &'static str,
    },

    /// The sandbox capability grant could not be set up.
    #[error("WASI setup failed: {0}")]
    Wasi(String),

    /// IO error reading the module.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying Wasmtime error.
    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

/// Faults on the host/guest memory boundary.
///
/// Any of these indicates a protocol or guest defect and must never be
/// silently swallowed.
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// The guest allocator returned offset 0 or failed outright.
    #[error("Guest allocation of {size} bytes failed{}", reason_suffix(.reason))]
    AllocationFailed {
        /// The requested size.
        size: u32,
        /// The runtime error, when the allocator call itself failed.
        reason: Option<String>,
    },

    /// A host read or write would exceed guest memory.
    #[error("Memory access out of bounds: offset={offset}, len={len}, memory_size={memory_size}")]
    OutOfBounds {
        /// The offset attempted.
        offset: u32,
        /// The length attempted.
        len: usize,
        /// Guest memory size at the time of the check.
        memory_size: usize,
    },

    /// The region returned by the guest lies outside its own memory.
    #[error("Result out of bounds: offset={offset}, len={len}, memory_size={memory_size}")]
    ResultOutOfBounds {
        /// The returned offset.
        offset: u32,
        /// The returned length.
        len: u32,
        /// Guest memory size at the time of the check.
        memory_size: usize,
    },

    /// The packed return value is malformed.
    #[error("Invalid packed result {raw:#018x}: null pointer with length {len}")]
    InvalidPackedResult {
        /// The raw 64-bit value.
        raw: u64,
        /// The decoded length.
        len: u32,
    },

    /// A guest call failed at the runtime level.
    #[error("Guest trapped in '{function}': {message}")]
    GuestTrap {
        /// The export that was being called.
        function: &'static str,
        /// Trap or exit description.
        message: String,
    },

    /// The guest result is not valid UTF-8.
    #[error("Invalid UTF-8 in guest result: {0}")]
    InvalidUtf8(String),

    /// Release of an offset the pool never handed out, or already released.
    #[error("Release of unowned guest offset {0}")]
    UnownedRelease(u32),
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_ref()
        .map(|r| format!(": {r}"))
        .unwrap_or_default()
}

/// Result type alias for guest operations.
pub type GuestResult<T> = std::result::Result<T, GuestError>;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type alias for module operations.
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

/// Result type alias for boundary operations.
pub type BoundaryResult<T> = std::result::Result<T, BoundaryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_paths() {
        let err = ModuleError::NotFound {
            probed: vec![PathBuf::from("/a/suola.wasm"), PathBuf::from("/b/wasi.wasm")],
        };
        let msg = err.to_string();
        assert!(msg.contains("/a/suola.wasm, /b/wasi.wasm"));
    }

    #[test]
    fn test_allocation_failed_message() {
        let plain = BoundaryError::AllocationFailed {
            size: 10,
            reason: None,
        };
        assert_eq!(plain.to_string(), "Guest allocation of 10 bytes failed");

        let trapped = BoundaryError::AllocationFailed {
            size: 10,
            reason: Some("unreachable".into()),
        };
        assert!(trapped.to_string().ends_with(": unreachable"));
    }

    #[test]
    fn test_classification() {
        assert!(GuestError::EmptyInput.is_input());
        assert!(GuestError::InputTooLarge { len: 1, max: 0 }.is_input());
        assert!(GuestError::GuestReported("no match".into()).is_guest_reported());
        assert!(!GuestError::Boundary(BoundaryError::UnownedRelease(8)).is_input());
    }
}

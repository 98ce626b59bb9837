//! Guest module loading and export validation.
//!
//! A module is only accepted if it exports the full signature call
//! contract: an allocator, a deallocator, the compute function, and a
//! linear memory.

use std::path::Path;

use tracing::{debug, info};
use wasmtime::{ExternType, Module, ValType};

use crate::engine::SharedEngine;
use crate::error::{ModuleError, ModuleResult};

/// Export name of the guest allocator, `(size: u32) -> u32`.
pub const ALLOCATE_EXPORT: &str = "Malloc";
/// Export name of the guest deallocator, `(offset: u32)`.
pub const RELEASE_EXPORT: &str = "Free";
/// Export name of the compute function, `(offset: u32, len: u32) -> u64`.
pub const SIGNATURE_EXPORT: &str = "GetSignature";
/// Export name of the guest linear memory.
pub const MEMORY_EXPORT: &str = "memory";
/// Optional startup export run once after instantiation.
pub const STARTUP_EXPORT: &str = "_start";
/// Import module of the WASI preview1 host functions.
pub const WASI_IMPORT_MODULE: &str = "wasi_snapshot_preview1";

/// A compiled module that satisfies the signature call contract.
#[derive(Clone)]
pub struct ValidatedModule {
    /// The underlying Wasmtime module.
    inner: Module,
    /// Exports found during validation.
    exports: Vec<ExportInfo>,
    /// Names of the import modules the guest links against.
    import_modules: Vec<String>,
}

impl ValidatedModule {
    /// Get a reference to the underlying Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Get the module name, if set.
    pub fn name(&self) -> Option<&str> {
        self.inner.name()
    }

    /// Get the list of exports.
    pub fn exports(&self) -> &[ExportInfo] {
        &self.exports
    }

    /// Check if the module has a specific export.
    pub fn has_export(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e.name == name)
    }

    /// Whether the guest defines a startup export.
    pub fn has_startup(&self) -> bool {
        self.has_export(STARTUP_EXPORT)
    }

    /// Whether the guest imports WASI preview1 host functions.
    pub fn links_wasi(&self) -> bool {
        self.import_modules.iter().any(|m| m == WASI_IMPORT_MODULE)
    }
}

impl std::fmt::Debug for ValidatedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedModule")
            .field("name", &self.name())
            .field("exports", &self.exports.len())
            .field("import_modules", &self.import_modules)
            .finish()
    }
}

/// Information about an exported item.
#[derive(Debug, Clone)]
pub struct ExportInfo {
    /// Export name.
    pub name: String,
    /// Type of the export.
    pub kind: ExportKind,
}

/// The kind of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportKind {
    /// A function export with its parameter and result types.
    Function {
        /// Parameter types.
        params: Vec<WasmType>,
        /// Result types.
        results: Vec<WasmType>,
    },
    /// A memory export.
    Memory,
    /// A global export.
    Global,
    /// A table export.
    Table,
}

/// Numeric value types relevant to the call contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmType {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// Any other value type.
    Other,
}

impl From<ValType> for WasmType {
    fn from(ty: ValType) -> Self {
        match ty {
            ValType::I32 => WasmType::I32,
            ValType::I64 => WasmType::I64,
            _ => WasmType::Other,
        }
    }
}

/// Loader for guest modules.
pub struct ModuleLoader {
    /// Engine used for compilation.
    engine: SharedEngine,
}

impl ModuleLoader {
    /// Create a new module loader with the given engine.
    pub fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }

    /// Load and validate a module from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid WASM module or the
    /// module lacks a required export.
    pub fn load_bytes(&self, bytes: &[u8]) -> ModuleResult<ValidatedModule> {
        debug!(size = bytes.len(), "Loading guest module from bytes");

        let module = Module::new(self.engine.inner(), bytes)?;
        self.validate(module)
    }

    /// Load and validate a module from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a valid WASM
    /// module, or lacks a required export.
    pub fn load_file(&self, path: &Path) -> ModuleResult<ValidatedModule> {
        debug!(path = %path.display(), "Loading guest module from file");

        let module = Module::from_file(self.engine.inner(), path)?;
        let validated = self.validate(module)?;

        info!(path = %path.display(), "Loaded guest module from file");
        Ok(validated)
    }

    /// Load and validate a module from WAT text.
    ///
    /// Primarily useful for testing.
    pub fn load_wat(&self, wat: &str) -> ModuleResult<ValidatedModule> {
        let wasm = wat::parse_str(wat).map_err(|e| ModuleError::Invalid(e.to_string()))?;
        self.load_bytes(&wasm)
    }

    fn validate(&self, module: Module) -> ModuleResult<ValidatedModule> {
        let exports: Vec<ExportInfo> = module
            .exports()
            .map(|export| ExportInfo {
                name: export.name().to_string(),
                kind: export_kind(export.ty()),
            })
            .collect();

        let mut import_modules: Vec<String> = Vec::new();
        for import in module.imports() {
            if !import_modules.iter().any(|m| m == import.module()) {
                import_modules.push(import.module().to_string());
            }
        }

        require_function(
            &exports,
            ALLOCATE_EXPORT,
            &[WasmType::I32],
            &[WasmType::I32],
            "func (i32) -> i32",
        )?;
        require_function(&exports, RELEASE_EXPORT, &[WasmType::I32], &[], "func (i32)")?;
        require_function(
            &exports,
            SIGNATURE_EXPORT,
            &[WasmType::I32, WasmType::I32],
            &[WasmType::I64],
            "func (i32, i32) -> i64",
        )?;
        if !exports
            .iter()
            .any(|e| e.name == MEMORY_EXPORT && e.kind == ExportKind::Memory)
        {
            return Err(ModuleError::MissingExport {
                name: MEMORY_EXPORT,
                expected: "memory",
            });
        }

        info!(
            name = ?module.name(),
            exports = exports.len(),
            imports = ?import_modules,
            "Validated guest module"
        );

        Ok(ValidatedModule {
            inner: module,
            exports,
            import_modules,
        })
    }
}

fn require_function(
    exports: &[ExportInfo],
    name: &'static str,
    params: &[WasmType],
    results: &[WasmType],
    expected: &'static str,
) -> ModuleResult<()> {
    let matches = exports.iter().any(|e| {
        e.name == name
            && matches!(&e.kind, ExportKind::Function { params: p, results: r }
                if p.as_slice() == params && r.as_slice() == results)
    });
    if matches {
        Ok(())
    } else {
        Err(ModuleError::MissingExport { name, expected })
    }
}

fn export_kind(ty: ExternType) -> ExportKind {
    match ty {
        ExternType::Func(func) => ExportKind::Function {
            params: func.params().map(WasmType::from).collect(),
            results: func.results().map(WasmType::from).collect(),
        },
        ExternType::Memory(_) => ExportKind::Memory,
        ExternType::Global(_) => ExportKind::Global,
        ExternType::Table(_) => ExportKind::Table,
    }
}

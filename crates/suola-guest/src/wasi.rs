//! Sandbox capability grant for the guest.
//!
//! The guest gets no ambient filesystem access. When a rule source is
//! configured, exactly its containing directory is preopened read-only and
//! the absolute rule path is passed as the guest's only argument.

use std::path::{Path, PathBuf};

use tracing::debug;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::error::{ModuleError, ModuleResult};
use crate::locate::MODULE_FILE_NAME;

/// A resolved, existing rule-source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    path: PathBuf,
    dir: PathBuf,
}

impl RuleSource {
    /// Resolve `path` to an absolute, existing file.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::RuleSourceNotFound`] if the file does not
    /// exist.
    pub fn resolve(path: impl AsRef<Path>) -> ModuleResult<Self> {
        let path = path.as_ref();
        let absolute = path
            .canonicalize()
            .map_err(|_| ModuleError::RuleSourceNotFound(path.to_path_buf()))?;
        if !absolute.is_file() {
            return Err(ModuleError::RuleSourceNotFound(path.to_path_buf()));
        }
        let dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ModuleError::RuleSourceNotFound(path.to_path_buf()))?;

        Ok(Self {
            path: absolute,
            dir,
        })
    }

    /// The absolute rule-source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory granted to the guest.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Guest startup arguments: the program name, then the rule path if any.
pub fn guest_args(rule_source: Option<&RuleSource>) -> Vec<String> {
    let mut args = vec![MODULE_FILE_NAME.to_string()];
    if let Some(rules) = rule_source {
        args.push(rules.path().to_string_lossy().into_owned());
    }
    args
}

/// Build the WASI context handed to the guest store.
pub fn build_wasi_ctx(
    rule_source: Option<&RuleSource>,
    inherit_stderr: bool,
) -> ModuleResult<WasiP1Ctx> {
    let mut builder = WasiCtxBuilder::new();
    if inherit_stderr {
        builder.inherit_stderr();
    }
    builder.args(&guest_args(rule_source));

    if let Some(rules) = rule_source {
        let guest_dir = rules.dir().to_string_lossy().into_owned();
        builder
            .preopened_dir(rules.dir(), &guest_dir, DirPerms::READ, FilePerms::READ)
            .map_err(|e| ModuleError::Wasi(format!("preopen {guest_dir}: {e}")))?;
        debug!(dir = %guest_dir, rules = %rules.path().display(), "Granted rule directory to guest");
    }

    Ok(builder.build_p1())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_existing_rule_source() {
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("rules.yaml");
        fs::write(&rules, "sites: []\n").unwrap();

        let source = RuleSource::resolve(&rules).unwrap();
        assert!(source.path().is_absolute());
        assert_eq!(source.dir(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_resolve_missing_rule_source() {
        let result = RuleSource::resolve("/nonexistent/path/rules.yaml");
        assert!(matches!(result, Err(ModuleError::RuleSourceNotFound(_))));
    }

    #[test]
    fn test_directory_is_not_a_rule_source() {
        let dir = tempfile::tempdir().unwrap();
        let result = RuleSource::resolve(dir.path());
        assert!(matches!(result, Err(ModuleError::RuleSourceNotFound(_))));
    }

    #[test]
    fn test_guest_args() {
        assert_eq!(guest_args(None), vec![MODULE_FILE_NAME.to_string()]);

        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("rules.yaml");
        fs::write(&rules, "sites: []\n").unwrap();
        let source = RuleSource::resolve(&rules).unwrap();

        let args = guest_args(Some(&source));
        assert_eq!(args.len(), 2);
        assert_eq!(args[1], source.path().to_string_lossy());
    }

    #[test]
    fn test_build_wasi_ctx_with_grant() {
        let dir = tempfile::tempdir().unwrap();
        let rules = dir.path().join("rules.yaml");
        fs::write(&rules, "sites: []\n").unwrap();
        let source = RuleSource::resolve(&rules).unwrap();

        assert!(build_wasi_ctx(Some(&source), false).is_ok());
        assert!(build_wasi_ctx(None, true).is_ok());
    }
}

//! Locating the guest module on disk.
//!
//! Candidates are probed in a fixed order and the first existing file wins.

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ModuleError, ModuleResult};

/// File name of the packaged guest module.
pub const MODULE_FILE_NAME: &str = "suola.wasm";

/// Environment variable naming an explicit module path.
pub const MODULE_ENV_VAR: &str = "SUOLA_MODULE";

/// Application directory name under the user data directory.
const APP_DIR_NAME: &str = "suola";

/// Marker file present inside Docker containers.
const DOCKER_MARKER: &str = "/.dockerenv";

/// Build the ordered list of candidate module locations.
///
/// 1. `$SUOLA_MODULE`, if set
/// 2. `<cwd>/suola.wasm`
/// 3. `<cwd>/../build/wasi.wasm` (sibling build output)
/// 4. `<user data dir>/suola/<major.minor>/suola.wasm`, then the same
///    without the version segment
/// 5. `<executable dir>/suola.wasm` (bundled resource)
/// 6. container build locations, when running inside Docker
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(explicit) = env::var_os(MODULE_ENV_VAR).filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(explicit));
    }

    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join(MODULE_FILE_NAME));
        candidates.push(cwd.join("..").join("build").join("wasi.wasm"));
    }

    if let Some(data_dir) = dirs::data_dir() {
        let app_dir = data_dir.join(APP_DIR_NAME);
        candidates.push(app_dir.join(version_dir()).join(MODULE_FILE_NAME));
        candidates.push(app_dir.join(MODULE_FILE_NAME));
    }

    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(MODULE_FILE_NAME));
    }

    if Path::new(DOCKER_MARKER).exists() {
        candidates.push(PathBuf::from("/app/build/wasi.wasm"));
        candidates.push(PathBuf::from("/app/packages/suola/build/wasi.wasm"));
    }

    candidates
}

/// Locate the guest module using the standard candidate list.
///
/// # Errors
///
/// Returns [`ModuleError::NotFound`] listing every probed path if none
/// exists.
pub fn locate_module() -> ModuleResult<PathBuf> {
    locate_in(&candidate_paths())
}

/// Return the first existing path from `candidates`.
pub fn locate_in(candidates: &[PathBuf]) -> ModuleResult<PathBuf> {
    match candidates.iter().find(|path| path.is_file()) {
        Some(found) => {
            debug!(path = %found.display(), "Found guest module");
            Ok(found.clone())
        }
        None => Err(ModuleError::NotFound {
            probed: candidates.to_vec(),
        }),
    }
}

/// Installed modules are kept per `major.minor` release.
fn version_dir() -> String {
    format!(
        "{}.{}",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_locate_prefers_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("missing.wasm");
        let second = dir.path().join("second.wasm");
        let third = dir.path().join("third.wasm");
        fs::write(&second, b"\0asm").unwrap();
        fs::write(&third, b"\0asm").unwrap();

        let found = locate_in(&[first, second.clone(), third]).unwrap();
        assert_eq!(found, second);
    }

    #[test]
    fn test_locate_reports_all_probed_paths() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![dir.path().join("a.wasm"), dir.path().join("b.wasm")];

        match locate_in(&candidates) {
            Err(ModuleError::NotFound { probed }) => assert_eq!(probed, candidates),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_directories_are_not_modules() {
        let dir = tempfile::tempdir().unwrap();
        let result = locate_in(&[dir.path().to_path_buf()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_candidates_include_working_directory() {
        let cwd = env::current_dir().unwrap();
        let candidates = candidate_paths();
        assert!(candidates.contains(&cwd.join(MODULE_FILE_NAME)));
        assert!(candidates.contains(&cwd.join("..").join("build").join("wasi.wasm")));
    }

    #[test]
    fn test_candidates_include_versioned_data_dir() {
        let Some(data_dir) = dirs::data_dir() else {
            return;
        };
        let app_dir = data_dir.join("suola");
        let versioned = app_dir.join(version_dir()).join(MODULE_FILE_NAME);
        let unversioned = app_dir.join(MODULE_FILE_NAME);

        let candidates = candidate_paths();
        let position = |path: &PathBuf| candidates.iter().position(|c| c == path);
        let (Some(first), Some(second)) = (position(&versioned), position(&unversioned)) else {
            panic!("data dir candidates missing from {candidates:?}");
        };
        assert!(first < second);
    }

    #[test]
    fn test_version_dir_is_major_minor() {
        let version = version_dir();
        let parts: Vec<&str> = version.split('.').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.parse::<u64>().is_ok()));
        assert!(env!("CARGO_PKG_VERSION").starts_with(&format!("{version}.")));
    }
}

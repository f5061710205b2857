//! Host helpers shared by the compiler front-end and the CLI.
//!
//! Centralizes executable detection, PATH resolution, compiler search order,
//! and platform artifact naming so callers subscribe to the same behavior
//! instead of re-implementing it.

use std::env;
use std::path::{Path, PathBuf};

/// Compilers tried on PATH when nothing more specific is configured.
const DEFAULT_COMPILERS: &[&str] = &["c++", "g++", "clang++"];

/// Returns true when a file exists and has any execute bit set.
pub fn helper_is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path) {
            return meta.permissions().mode() & 0o111 != 0;
        }
        false
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Find an executable by name somewhere on PATH.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    for dir in env::split_paths(&paths) {
        let candidate = dir.join(name);
        if helper_is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{name}.exe"));
            if helper_is_executable(&exe) {
                return Some(exe);
            }
        }
    }
    None
}

/// Resolve a configured compiler value: explicit paths must be executable,
/// bare names are looked up on PATH.
fn resolve_program(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = Path::new(trimmed);
    if path.components().count() > 1 || path.is_absolute() {
        return helper_is_executable(path).then(|| path.to_path_buf());
    }
    find_on_path(trimmed)
}

/// Compiler search order.
///
/// Honors an explicit override (usually `MODRUNNER_CXX`), then the compiler
/// baked in by `build.rs` from `CXX`, then the usual C++ driver names on PATH.
pub fn resolve_compiler(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(value) = explicit {
        if let Some(found) = resolve_program(value) {
            return Some(found);
        }
    }

    if let Some(hint) = option_env!("MODRUNNER_CXX_HINT") {
        if let Some(found) = resolve_program(hint) {
            return Some(found);
        }
    }

    DEFAULT_COMPILERS.iter().find_map(|name| find_on_path(name))
}

/// `<module>.<platform dynamic-library extension>`, e.g. `imu.so`.
pub fn artifact_file_name(module_name: &str) -> String {
    format!("{module_name}.{}", env::consts::DLL_EXTENSION)
}

/// Split comma- or whitespace-delimited flag lists into tokens.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .replace(',', " ")
        .split_whitespace()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#![allow(dead_code)]

use anyhow::{Context, Result};
use modrunner::runtime::resolve_compiler;
use modrunner::{CompileOptions, Compiler};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

/// System libraries that export plain C symbols such as `abs`.
const SYSTEM_LIBRARIES: &[&str] = &[
    "libc.so.6",
    "libm.so.6",
    "/usr/lib/libSystem.B.dylib",
];

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("modrunner=debug"))
            .with_test_writer()
            .try_init();
    });
}

/// A C++ driver to exercise real builds with, or `None` to skip.
pub fn real_compiler() -> Option<PathBuf> {
    let found = resolve_compiler(None);
    if found.is_none() {
        eprintln!("skipping: no C++ compiler found on PATH");
    }
    found
}

pub fn compiler_into(program: &Path, output_dir: &Path) -> Compiler {
    Compiler::new(
        program,
        output_dir.to_path_buf(),
        Arc::new(CompileOptions::default()),
    )
}

/// A system library the registry can open by name, or `None` to skip.
pub fn system_library() -> Option<&'static str> {
    let found = SYSTEM_LIBRARIES
        .iter()
        .copied()
        .find(|candidate| unsafe { libloading::Library::new(candidate) }.is_ok());
    if found.is_none() {
        eprintln!("skipping: no known system C library could be opened");
    }
    found
}

pub fn manifest(name: &str) -> Value {
    json!({
        "name": name,
        "version": "1.0.0",
        "author": "hub team",
        "license": "MIT",
        "description": format!("{name} add-on"),
    })
}

/// Write `<root>/<dir>/module.json` and return the add-on directory.
pub fn write_manifest(root: &Path, dir: &str, manifest: &Value) -> Result<PathBuf> {
    let module_dir = root.join(dir);
    fs::create_dir_all(&module_dir)
        .with_context(|| format!("creating {}", module_dir.display()))?;
    let path = module_dir.join(modrunner::MANIFEST_FILE_NAME);
    fs::write(&path, serde_json::to_vec_pretty(manifest)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(module_dir)
}

//! Activation glue between the catalog, the compiler, and the registry.
//!
//! Picks the artifact a descriptor names (or builds one from its source) and
//! loads it under the descriptor's name. The three components never see each
//! other; only this module does.

use crate::catalog::{Catalog, ModuleDescriptor};
use crate::compiler::{CompileError, Compiler};
use crate::registry::{LoadError, ModuleRegistry};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Entry name used as the compile cache key when a manifest names none.
pub const DEFAULT_ENTRY_NAME: &str = "module_init";

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("module '{0}' is not in the catalog")]
    UnknownModule(String),

    #[error("module '{0}' names neither a library nor a source file")]
    NothingToLoad(String),

    #[error("reading source {} for module '{module}': {source}", path.display())]
    Source {
        module: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrigin {
    Prebuilt,
    Compiled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// What activation loaded for one module.
pub struct Activation {
    pub name: String,
    pub artifact: PathBuf,
    pub origin: ArtifactOrigin,
}

/// Decide which artifact backs `descriptor`, compiling its source if needed.
///
/// A prebuilt `library` always wins over `source`.
pub fn resolve_artifact(
    descriptor: &ModuleDescriptor,
    compiler: &Compiler,
) -> Result<(PathBuf, ArtifactOrigin), ActivationError> {
    if let Some(library) = &descriptor.library {
        return Ok((library.clone(), ArtifactOrigin::Prebuilt));
    }

    let Some(source_path) = &descriptor.source else {
        return Err(ActivationError::NothingToLoad(descriptor.name.clone()));
    };
    let source = fs::read_to_string(source_path).map_err(|err| ActivationError::Source {
        module: descriptor.name.clone(),
        path: source_path.clone(),
        source: err,
    })?;
    let entry = descriptor.entry.as_deref().unwrap_or(DEFAULT_ENTRY_NAME);
    let artifact = compiler.compile(&source, &descriptor.name, entry)?;
    Ok((artifact, ArtifactOrigin::Compiled))
}

/// Resolve and load one descriptor into `registry` under its own name.
pub fn activate(
    descriptor: &ModuleDescriptor,
    compiler: &Compiler,
    registry: &ModuleRegistry,
) -> Result<Activation, ActivationError> {
    let (artifact, origin) = resolve_artifact(descriptor, compiler)?;
    registry.load(&artifact, &descriptor.name)?;
    info!(
        module = %descriptor.name,
        artifact = %artifact.display(),
        ?origin,
        "module activated"
    );
    Ok(Activation {
        name: descriptor.name.clone(),
        artifact,
        origin,
    })
}

/// Activate the named catalog entries in order, collecting per-module
/// outcomes rather than stopping at the first failure.
pub fn activate_selected(
    catalog: &Catalog,
    names: &[String],
    compiler: &Compiler,
    registry: &ModuleRegistry,
) -> Vec<(String, Result<Activation, ActivationError>)> {
    names
        .iter()
        .map(|name| {
            let outcome = match catalog.get(name) {
                Some(descriptor) => activate(descriptor, compiler, registry),
                None => Err(ActivationError::UnknownModule(name.clone())),
            };
            if let Err(err) = &outcome {
                warn!(module = %name, error = %err, "activation failed");
            }
            (name.clone(), outcome)
        })
        .collect()
}

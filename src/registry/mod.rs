//! Module registry: the owner of every live native handle.
//!
//! Each name moves through `Unloaded -> Loaded&Enabled <-> Loaded&Disabled ->
//! Unloaded`. Mutations (`load`, `unload`, `enable`, `disable`) take the write
//! lock; lookups share the read lock. Handles never leave the registry:
//! callers receive `ModuleFn`/`ModuleInstance` values that hold a lease on the
//! module, and `unload` refuses while any lease is outstanding.
//!
//! The registry is an ordinary value. Whoever constructs it owns it; dropping
//! it unloads everything still resident.

mod lease;
mod native;

pub use lease::{ModuleFn, ModuleInstance, ModuleLease};
pub use native::InstanceFactory;

use native::{NativeLibrary, ResolveError, invoke_factory};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("module name must not be empty")]
    InvalidName,

    #[error("module '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("failed to open {}: {diagnostic}", path.display())]
    OpenFailed { path: PathBuf, diagnostic: String },

    #[error("module '{0}' is not loaded")]
    NotFound(String),

    #[error("symbol '{symbol}' not found in module '{module}': {diagnostic}")]
    SymbolNotFound {
        module: String,
        symbol: String,
        diagnostic: String,
    },

    #[error("module '{0}' is disabled")]
    Disabled(String),

    #[error("module '{module}' still has {outstanding} outstanding lease(s)")]
    InUse { module: String, outstanding: usize },

    #[error("symbol '{symbol}' cannot be read as a {size}-byte value; expected a pointer")]
    InvalidSignature { symbol: String, size: usize },

    #[error("factory '{symbol}' in module '{module}' returned no instance")]
    FactoryFailed { module: String, symbol: String },

    #[error("instance config for module '{module}' is not representable as a C string")]
    InvalidConfig { module: String },
}

struct LoadedModule {
    library: Arc<NativeLibrary>,
    enabled: bool,
    loaded_at: SystemTime,
}

impl LoadedModule {
    /// Leases currently held outside the registry.
    fn outstanding_leases(&self) -> usize {
        Arc::strong_count(&self.library) - 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Snapshot of one resident module.
pub struct ModuleInfo {
    pub name: String,
    pub path: PathBuf,
    pub enabled: bool,
    pub loaded_at: SystemTime,
    pub outstanding_leases: usize,
}

#[derive(Default)]
struct RegistryState {
    modules: BTreeMap<String, LoadedModule>,
    /// Every path a name was ever loaded from; survives unload.
    known_paths: BTreeMap<String, PathBuf>,
}

impl RegistryState {
    /// The module behind `name` if it may hand out capabilities.
    fn usable(&self, name: &str) -> Result<&LoadedModule, LoadError> {
        let module = self.modules.get(name).ok_or_else(|| {
            warn!(module = name, "capability requested from module that is not loaded");
            LoadError::NotFound(name.to_string())
        })?;
        if !module.enabled {
            warn!(module = name, "capability requested from disabled module");
            return Err(LoadError::Disabled(name.to_string()));
        }
        Ok(module)
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the artifact at `path` and register it as `name`, enabled.
    ///
    /// Fails without side effects when `name` is already resident.
    pub fn load(&self, path: impl AsRef<Path>, name: &str) -> Result<(), LoadError> {
        let path = path.as_ref();
        if name.trim().is_empty() {
            return Err(LoadError::InvalidName);
        }

        let mut state = self.state.write();
        if state.modules.contains_key(name) {
            warn!(module = name, path = %path.display(), "module already loaded");
            return Err(LoadError::AlreadyLoaded(name.to_string()));
        }

        let library = NativeLibrary::open(path).map_err(|diagnostic| {
            warn!(module = name, path = %path.display(), %diagnostic, "failed to open module");
            LoadError::OpenFailed {
                path: path.to_path_buf(),
                diagnostic,
            }
        })?;

        state
            .known_paths
            .insert(name.to_string(), path.to_path_buf());
        state.modules.insert(
            name.to_string(),
            LoadedModule {
                library: Arc::new(library),
                enabled: true,
                loaded_at: SystemTime::now(),
            },
        );
        info!(module = name, path = %path.display(), "module loaded");
        Ok(())
    }

    /// Close and forget `name`.
    ///
    /// Refuses with `InUse` while functions or instances derived from the
    /// module are still alive.
    pub fn unload(&self, name: &str) -> Result<(), LoadError> {
        let mut state = self.state.write();
        let module = match state.modules.entry(name.to_string()) {
            Entry::Vacant(_) => {
                debug!(module = name, "unload of module that is not loaded");
                return Err(LoadError::NotFound(name.to_string()));
            }
            Entry::Occupied(occupied) => {
                let outstanding = occupied.get().outstanding_leases();
                if outstanding > 0 {
                    warn!(module = name, outstanding, "unload refused; leases outstanding");
                    return Err(LoadError::InUse {
                        module: name.to_string(),
                        outstanding,
                    });
                }
                occupied.remove()
            }
        };
        drop(state);

        close_library(name, module.library);
        info!(module = name, "module unloaded");
        Ok(())
    }

    /// Resident right now.
    pub fn has_module(&self, name: &str) -> bool {
        self.state.read().modules.contains_key(name)
    }

    /// A path was recorded for `name` at some point, resident or not.
    pub fn module_exists(&self, name: &str) -> bool {
        self.state.read().known_paths.contains_key(name)
    }

    /// Last path `name` was loaded from.
    pub fn module_path(&self, name: &str) -> Option<PathBuf> {
        self.state.read().known_paths.get(name).cloned()
    }

    pub fn enable(&self, name: &str) -> Result<(), LoadError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<(), LoadError> {
        self.set_enabled(name, false)
    }

    /// `None` when `name` is not resident.
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.state.read().modules.get(name).map(|module| module.enabled)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), LoadError> {
        let mut state = self.state.write();
        let module = state
            .modules
            .get_mut(name)
            .ok_or_else(|| LoadError::NotFound(name.to_string()))?;
        if module.enabled != enabled {
            module.enabled = enabled;
            info!(module = name, enabled, "module state changed");
        }
        Ok(())
    }

    /// Resolve `symbol` in `name` as a value of type `F`.
    ///
    /// # Safety
    ///
    /// `F` must match the symbol's real type, typically the exact
    /// `unsafe extern "C" fn(..)` signature it was compiled with. Nothing here
    /// can check that; a mismatch is undefined behaviour at call time.
    pub unsafe fn get_function<F: Copy>(
        &self,
        name: &str,
        symbol: &str,
    ) -> Result<ModuleFn<F>, LoadError> {
        let state = self.state.read();
        let module = state.usable(name)?;
        // SAFETY: forwarded to the caller.
        let func = unsafe { module.library.resolve::<F>(symbol) }
            .map_err(|err| resolve_error(name, symbol, err))?;
        debug!(module = name, symbol, "resolved function");
        Ok(ModuleFn::new(func, ModuleLease::new(name, &module.library)))
    }

    /// Call the factory `factory_symbol` in `name` with `config` (passed as
    /// JSON text) and take ownership of the instance it returns.
    ///
    /// # Safety
    ///
    /// The symbol must have the [`InstanceFactory<T>`] shape, `T` must match
    /// the layout the module allocates, and the instance must come from
    /// `malloc` so it can be released with `free`.
    pub unsafe fn get_instance<T>(
        &self,
        name: &str,
        config: &Value,
        factory_symbol: &str,
    ) -> Result<ModuleInstance<T>, LoadError> {
        let config_json = CString::new(config.to_string()).map_err(|_| LoadError::InvalidConfig {
            module: name.to_string(),
        })?;

        let (factory, lease) = {
            let state = self.state.read();
            let module = state.usable(name)?;
            // SAFETY: forwarded to the caller.
            let factory = unsafe { module.library.resolve::<InstanceFactory<T>>(factory_symbol) }
                .map_err(|err| resolve_error(name, factory_symbol, err))?;
            (factory, ModuleLease::new(name, &module.library))
        };

        // The lease keeps the library mapped, so the factory runs unlocked.
        // SAFETY: forwarded to the caller.
        let instance = unsafe { invoke_factory(factory, &config_json) }.ok_or_else(|| {
            warn!(module = name, symbol = factory_symbol, "instance factory failed");
            LoadError::FactoryFailed {
                module: name.to_string(),
                symbol: factory_symbol.to_string(),
            }
        })?;
        debug!(module = name, symbol = factory_symbol, "created module instance");
        Ok(ModuleInstance::new(instance, lease))
    }

    /// Resident module names in lexicographic order, enabled or not.
    pub fn list_modules(&self) -> Vec<String> {
        self.state.read().modules.keys().cloned().collect()
    }

    pub fn module_info(&self, name: &str) -> Option<ModuleInfo> {
        let state = self.state.read();
        state.modules.get(name).map(|module| ModuleInfo {
            name: name.to_string(),
            path: module.library.path().to_path_buf(),
            enabled: module.enabled,
            loaded_at: module.loaded_at,
            outstanding_leases: module.outstanding_leases(),
        })
    }

    pub fn len(&self) -> usize {
        self.state.read().modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().modules.is_empty()
    }

    /// Force-unload everything. Libraries with outstanding leases stay mapped
    /// until those leases drop.
    pub fn unload_all(&self) {
        let modules = std::mem::take(&mut self.state.write().modules);
        teardown(modules);
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        let modules = std::mem::take(&mut self.state.get_mut().modules);
        teardown(modules);
    }
}

fn teardown(modules: BTreeMap<String, LoadedModule>) {
    for (name, module) in modules {
        let outstanding = module.outstanding_leases();
        if outstanding > 0 {
            warn!(
                module = %name,
                outstanding,
                "force-unloading module with live leases; library stays mapped until they drop"
            );
        }
        close_library(&name, module.library);
    }
}

fn close_library(name: &str, library: Arc<NativeLibrary>) {
    // Only the last reference closes; otherwise the final lease drop does.
    if let Ok(library) = Arc::try_unwrap(library) {
        if let Err(diagnostic) = library.close() {
            warn!(module = name, %diagnostic, "platform loader failed to close module");
        }
    }
}

fn resolve_error(module: &str, symbol: &str, err: ResolveError) -> LoadError {
    match err {
        ResolveError::NotPointerSized { size } => {
            warn!(module, symbol, size, "requested symbol type is not pointer-sized");
            LoadError::InvalidSignature {
                symbol: symbol.to_string(),
                size,
            }
        }
        ResolveError::Missing(diagnostic) => {
            warn!(module, symbol, %diagnostic, "symbol not found");
            LoadError::SymbolNotFound {
                module: module.to_string(),
                symbol: symbol.to_string(),
                diagnostic,
            }
        }
    }
}

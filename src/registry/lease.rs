//! Leases tie everything the registry hands out to the library it came from.
//!
//! A `ModuleLease` is a counted reference on a loaded library. While any
//! lease is alive the registry refuses to unload that module, and if the
//! registry itself is torn down the library stays mapped until the last lease
//! drops. Function pointers and instances are only ever returned wrapped
//! together with a lease.

use crate::registry::native::{ForeignBox, NativeLibrary};
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct ModuleLease {
    module: Arc<str>,
    library: Arc<NativeLibrary>,
}

impl ModuleLease {
    pub(crate) fn new(module: &str, library: &Arc<NativeLibrary>) -> Self {
        Self {
            module: Arc::from(module),
            library: Arc::clone(library),
        }
    }

    /// Name the module was loaded under.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Artifact the leased library was opened from.
    pub fn artifact(&self) -> &Path {
        self.library.path()
    }
}

impl fmt::Debug for ModuleLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLease")
            .field("module", &self.module)
            .field("artifact", &self.library.path())
            .finish()
    }
}

/// A resolved symbol of caller-chosen type `F`, usually an `extern "C" fn`.
///
/// Dereference to call: `(*add)(2, 3)`.
pub struct ModuleFn<F> {
    func: F,
    lease: ModuleLease,
}

impl<F: Copy> ModuleFn<F> {
    pub(crate) fn new(func: F, lease: ModuleLease) -> Self {
        Self { func, lease }
    }

    pub fn lease(&self) -> &ModuleLease {
        &self.lease
    }
}

impl<F: Copy> Deref for ModuleFn<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.func
    }
}

impl<F: Copy> Clone for ModuleFn<F> {
    fn clone(&self) -> Self {
        Self {
            func: self.func,
            lease: self.lease.clone(),
        }
    }
}

impl<F> fmt::Debug for ModuleFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleFn")
            .field("module", &self.lease.module())
            .finish_non_exhaustive()
    }
}

/// A factory-made instance shared between its holders.
///
/// Clones share the same instance; it is released (drop in place, then
/// `free`) when the last clone drops, strictly before the lease it carries.
pub struct ModuleInstance<T> {
    // Field order matters: the instance must drop before the lease.
    value: Arc<ForeignBox<T>>,
    lease: ModuleLease,
}

impl<T> ModuleInstance<T> {
    pub(crate) fn new(value: ForeignBox<T>, lease: ModuleLease) -> Self {
        Self {
            value: Arc::new(value),
            lease,
        }
    }

    pub fn lease(&self) -> &ModuleLease {
        &self.lease
    }
}

impl<T> Deref for ModuleInstance<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Clone for ModuleInstance<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            lease: self.lease.clone(),
        }
    }
}

impl<T> fmt::Debug for ModuleInstance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("module", &self.lease.module())
            .finish_non_exhaustive()
    }
}

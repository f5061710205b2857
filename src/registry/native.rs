//! Unsafe boundary around the platform loader.
//!
//! Every raw handle, symbol address, and foreign allocation in the crate is
//! touched here and nowhere else. The registry only sees `NativeLibrary`
//! (owns a handle), resolved `Copy` values, and `ForeignBox` (owns one
//! factory-made instance).

use libloading::Library;
use std::ffi::{CStr, c_char, c_void};
use std::mem::size_of;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

/// Shape every instance factory must have: JSON config text in, a
/// `malloc`-allocated instance out (null on failure).
pub type InstanceFactory<T> = unsafe extern "C" fn(config_json: *const c_char) -> *mut T;

#[derive(Debug)]
pub(crate) enum ResolveError {
    /// The requested type cannot hold a symbol address.
    NotPointerSized { size: usize },
    /// The loader could not find the symbol; carries its diagnostic.
    Missing(String),
}

/// An open dynamic library. Closing happens on drop or via [`close`].
///
/// [`close`]: NativeLibrary::close
#[derive(Debug)]
pub(crate) struct NativeLibrary {
    library: Library,
    path: PathBuf,
}

impl NativeLibrary {
    /// Open `path` with the platform loader; the error is its diagnostic.
    pub(crate) fn open(path: &Path) -> Result<Self, String> {
        // SAFETY: opening runs the artifact's initialisers. Artifacts are
        // add-ons the hub chose to activate; running their code is the point.
        let library = unsafe { Library::new(path) }.map_err(|err| {
            let diagnostic = err.to_string();
            if diagnostic.trim().is_empty() {
                format!("platform loader gave no diagnostic for {}", path.display())
            } else {
                diagnostic
            }
        })?;
        Ok(Self {
            library,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve `symbol` and reinterpret its address as `F`.
    ///
    /// # Safety
    ///
    /// `F` must be the exact type of the exported symbol (for functions: the
    /// `extern "C"` signature it was compiled with). The returned value must
    /// not be used after this library is closed.
    pub(crate) unsafe fn resolve<F: Copy>(&self, symbol: &str) -> Result<F, ResolveError> {
        if size_of::<F>() != size_of::<*const c_void>() {
            return Err(ResolveError::NotPointerSized {
                size: size_of::<F>(),
            });
        }
        // SAFETY: size checked above; type correctness is the caller's contract.
        let resolved = unsafe { self.library.get::<F>(symbol.as_bytes()) }
            .map_err(|err| ResolveError::Missing(err.to_string()))?;
        Ok(*resolved)
    }

    /// Close the handle explicitly so unload can report loader errors.
    pub(crate) fn close(self) -> Result<(), String> {
        self.library.close().map_err(|err| err.to_string())
    }
}

/// Call a resolved factory with a JSON config document.
///
/// # Safety
///
/// `factory` must come from a library that is still open and must really have
/// the [`InstanceFactory`] shape for this `T`, returning memory from `malloc`.
pub(crate) unsafe fn invoke_factory<T>(
    factory: InstanceFactory<T>,
    config_json: &CStr,
) -> Option<ForeignBox<T>> {
    // SAFETY: forwarded from the caller's contract.
    let raw = unsafe { factory(config_json.as_ptr()) };
    NonNull::new(raw).map(|ptr| ForeignBox { ptr })
}

/// Sole owner of an instance allocated by add-on code with `malloc`.
pub(crate) struct ForeignBox<T> {
    ptr: NonNull<T>,
}

impl<T> Deref for ForeignBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the pointer came from a successful factory call and is
        // uniquely owned by this box until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Drop for ForeignBox<T> {
    fn drop(&mut self) {
        // SAFETY: the instance is initialised, uniquely owned, and was
        // allocated with the C allocator per the factory contract.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
            libc::free(self.ptr.as_ptr().cast::<c_void>());
        }
    }
}

// SAFETY: ForeignBox owns its T exclusively, exactly like Box<T>.
unsafe impl<T: Send> Send for ForeignBox<T> {}
// SAFETY: shared access only hands out &T.
unsafe impl<T: Sync> Sync for ForeignBox<T> {}

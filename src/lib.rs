//! Dynamic module runtime for the device hub.
//!
//! Three components, in dependency order:
//!
//! - [`catalog`]: walk an add-on root and parse each `module.json` into a
//!   read-only [`Catalog`].
//! - [`compiler`]: turn C++ source into a loadable artifact, syntax-checking
//!   first and caching per `<module>::<entry>`.
//! - [`registry`]: own the live native handles and hand out typed functions
//!   and instances tied to a lease on their module.
//!
//! [`activation`] glues them together for one catalog entry, and
//! [`config`] carries the process-wide compile options and locations.

pub mod activation;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod logging;
pub mod registry;
pub mod runtime;
mod schema_loader;

pub use activation::{
    Activation, ActivationError, ArtifactOrigin, DEFAULT_ENTRY_NAME, activate, activate_selected,
    resolve_artifact,
};
pub use catalog::{Catalog, MANIFEST_FILE_NAME, ModuleDescriptor, ScanError, SkippedManifest, scan};
pub use compiler::{
    CacheEntry, CacheKey, CommandOutput, CommandRunner, CommandSpec, CompileError, Compiler,
    ProcessRunner,
};
pub use config::{CompileOptions, RuntimeConfig};
pub use registry::{
    InstanceFactory, LoadError, ModuleFn, ModuleInfo, ModuleInstance, ModuleLease, ModuleRegistry,
};

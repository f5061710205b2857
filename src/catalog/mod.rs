//! Manifest scanning and the read-only module catalog.
//!
//! `scan` walks an add-on root and parses every `module.json` it finds;
//! `Catalog` is the immutable snapshot handed to activation logic. Types here
//! mirror `schema/module_manifest.schema.json`.

pub mod model;
pub mod scan;

pub use model::{Catalog, MANIFEST_FILE_NAME, ModuleDescriptor, SkippedManifest};
pub use scan::{ScanError, scan};

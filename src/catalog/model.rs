//! Descriptor and catalog types produced by a manifest scan.
//!
//! `ManifestFields` mirrors `schema/module_manifest.schema.json`; the public
//! `ModuleDescriptor` adds the paths derived from the directory walk. Catalogs
//! are rebuilt from scratch on every scan and only hand out shared
//! references, so descriptors stay immutable once parsed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name the scanner looks for inside each module directory.
pub const MANIFEST_FILE_NAME: &str = "module.json";

#[derive(Debug, Clone, Deserialize)]
/// Fields read from `module.json`; unknown keys are ignored.
pub(crate) struct ManifestFields {
    pub name: String,
    pub version: String,
    pub author: String,
    pub license: String,
    pub description: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub library: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// One add-on as described by its manifest.
///
/// `root` and `descriptor_path` come from the filesystem walk and are never
/// read from the manifest itself. Optional `source`/`library` paths are
/// resolved against `root`.
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub author: String,
    pub license: String,
    pub description: String,
    pub root: PathBuf,
    pub descriptor_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,
}

impl ModuleDescriptor {
    pub(crate) fn from_fields(fields: ManifestFields, root: &Path, descriptor_path: &Path) -> Self {
        Self {
            name: fields.name,
            version: fields.version,
            author: fields.author,
            license: fields.license,
            description: fields.description,
            root: root.to_path_buf(),
            descriptor_path: descriptor_path.to_path_buf(),
            source: fields.source.map(|rel| root.join(rel)),
            entry: fields.entry,
            library: fields.library.map(|rel| root.join(rel)),
        }
    }

    /// True when the descriptor points at source that must be compiled.
    pub fn needs_compile(&self) -> bool {
        self.library.is_none() && self.source.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// A descriptor that was found but not admitted to the catalog.
pub struct SkippedManifest {
    pub descriptor_path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
/// Read-only result of one scan, keyed by module name in stable order.
pub struct Catalog {
    root: PathBuf,
    modules: BTreeMap<String, ModuleDescriptor>,
    skipped: Vec<SkippedManifest>,
}

impl Catalog {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self {
            root,
            modules: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    /// Insert a descriptor, returning the one it displaced (if any).
    pub(crate) fn insert(&mut self, descriptor: ModuleDescriptor) -> Option<ModuleDescriptor> {
        self.modules.insert(descriptor.name.clone(), descriptor)
    }

    pub(crate) fn skip(&mut self, descriptor_path: PathBuf, reason: String) {
        self.skipped.push(SkippedManifest {
            descriptor_path,
            reason,
        });
    }

    /// Directory the catalog was built from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Module names in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Descriptors that were rejected during the scan, in traversal order.
    pub fn skipped(&self) -> &[SkippedManifest] {
        &self.skipped
    }
}

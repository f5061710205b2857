//! Process-lifetime compilation cache with per-artifact locking.
//!
//! Entries are keyed by `<module>::<entry>`, but every entry of a module
//! builds to the same artifact path, so slots are per module. A slot holds at
//! most the entry whose build currently occupies the artifact. A compile
//! holds the slot lock for its whole duration: a second caller on the same
//! module blocks until the first finishes and then sees the filled entry;
//! callers on other modules never contend beyond the brief map lookup.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

/// `<module>::<entry>`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct CacheKey {
    pub module: String,
    pub entry: String,
}

impl CacheKey {
    pub fn new(module_name: &str, entry_name: &str) -> Self {
        Self {
            module: module_name.to_string(),
            entry: entry_name.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.entry)
    }
}

/// Fingerprint of the source text a cache entry was built from.
///
/// Only compared within one process, so the std hasher's stability across
/// toolchains does not matter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct SourceDigest(u64);

impl SourceDigest {
    pub fn of(source: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        Self(hasher.finish())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    /// Key whose build currently occupies `artifact`.
    pub key: CacheKey,
    pub artifact: PathBuf,
    /// Option string the artifact was compiled with.
    pub options: String,
    pub source_digest: SourceDigest,
}

impl CacheEntry {
    /// True when this entry still describes the artifact `key` would get
    /// from `digest`.
    pub fn serves(&self, key: &CacheKey, digest: SourceDigest) -> bool {
        self.key == *key && self.source_digest == digest
    }
}

pub(crate) type Slot = Arc<Mutex<Option<CacheEntry>>>;

#[derive(Default)]
pub(crate) struct CompilationCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl CompilationCache {
    /// The slot guarding `module_name`'s artifact, created empty on first use.
    pub(crate) fn slot(&self, module_name: &str) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(module_name.to_string()).or_default())
    }

    /// Snapshot of the entry for `key`, if its build still occupies the
    /// artifact. Blocks while that module is being compiled.
    pub(crate) fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.slots.lock().get(&key.module).cloned()?;
        let entry = slot.lock().clone();
        entry.filter(|entry| entry.key == *key)
    }

    /// Drop the entry for `key`; returns whether one existed.
    pub(crate) fn invalidate(&self, key: &CacheKey) -> bool {
        let Some(slot) = self.slots.lock().get(&key.module).cloned() else {
            return false;
        };
        let mut cached = slot.lock();
        if cached.as_ref().is_some_and(|entry| entry.key == *key) {
            *cached = None;
            return true;
        }
        false
    }

    /// Number of artifacts backed by a live entry.
    pub(crate) fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }
}

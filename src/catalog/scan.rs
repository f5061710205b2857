//! One-shot manifest scan over an add-on root.
//!
//! Only root-level problems abort a scan. Every per-directory problem
//! (unreadable file, invalid JSON, schema violation) is recorded on the
//! catalog as a skip and logged, and the walk moves on to the next directory.

use crate::catalog::model::{Catalog, MANIFEST_FILE_NAME, ManifestFields, ModuleDescriptor};
use crate::schema_loader::manifest_schema;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Scan-level failures. Per-entry problems never surface here.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("module root not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied reading module root {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("module root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error reading module root {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ScanError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => ScanError::PermissionDenied(path.to_path_buf()),
            _ => ScanError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Build a fresh catalog from every `<root>/<dir>/module.json`.
///
/// Directories are visited in lexicographic order, so when two manifests
/// declare the same name the later directory wins (with a warning).
pub fn scan(root: impl AsRef<Path>) -> Result<Catalog, ScanError> {
    let root = root.as_ref();
    let metadata = fs::metadata(root).map_err(|err| ScanError::from_io(root, err))?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let module_dirs = module_directories(root)?;
    let mut catalog = Catalog::new(root.to_path_buf());

    for dir in module_dirs {
        let descriptor_path = dir.join(MANIFEST_FILE_NAME);
        if !descriptor_path.is_file() {
            debug!(dir = %dir.display(), "no manifest; ignoring directory");
            continue;
        }

        let fields = match parse_manifest(&descriptor_path) {
            Ok(fields) => fields,
            Err(reason) => {
                warn!(
                    descriptor = %descriptor_path.display(),
                    %reason,
                    "skipping module manifest"
                );
                catalog.skip(descriptor_path, reason);
                continue;
            }
        };

        let descriptor = ModuleDescriptor::from_fields(fields, &dir, &descriptor_path);
        if let Some(previous) = catalog.insert(descriptor) {
            warn!(
                name = %previous.name,
                previous = %previous.descriptor_path.display(),
                replacement = %descriptor_path.display(),
                "duplicate module name; later directory wins"
            );
        }
    }

    info!(
        root = %root.display(),
        modules = catalog.len(),
        skipped = catalog.skipped().len(),
        "manifest scan complete"
    );
    Ok(catalog)
}

fn module_directories(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let entries = fs::read_dir(root).map_err(|err| ScanError::from_io(root, err))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Read, validate, and deserialize one manifest; the error is the skip reason.
fn parse_manifest(path: &Path) -> Result<ManifestFields, String> {
    let data = fs::read_to_string(path).map_err(|err| format!("unable to read: {err}"))?;
    let value: Value = serde_json::from_str(&data).map_err(|err| format!("invalid JSON: {err}"))?;

    match manifest_schema() {
        Ok(schema) => {
            if let Err(errors) = schema.validate(&value) {
                return Err(format!(
                    "{} violations: {}",
                    schema.label(),
                    errors.join("; ")
                ));
            }
        }
        // Without the schema, serde still enforces the required fields.
        Err(err) => debug!(error = %err, "manifest schema unavailable"),
    }

    serde_json::from_value(value).map_err(|err| format!("invalid manifest: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_manifest(root: &Path, dir: &str, manifest: &Value) -> PathBuf {
        let module_dir = root.join(dir);
        fs::create_dir_all(&module_dir).unwrap();
        let path = module_dir.join(MANIFEST_FILE_NAME);
        fs::write(&path, serde_json::to_string_pretty(manifest).unwrap()).unwrap();
        path
    }

    fn manifest(name: &str) -> Value {
        json!({
            "name": name,
            "version": "1.0.0",
            "author": "hub team",
            "license": "MIT",
            "description": "fixture module"
        })
    }

    #[test]
    fn missing_root_is_not_found() {
        let temp = TempDir::new().expect("temp dir");
        let err = scan(temp.path().join("absent")).expect_err("missing root");
        assert!(matches!(err, ScanError::NotFound(_)), "{err:?}");
    }

    #[test]
    fn file_root_is_not_a_directory() {
        let temp = TempDir::new().expect("temp dir");
        let file = temp.path().join("plain.txt");
        fs::write(&file, "not a dir").unwrap();
        let err = scan(&file).expect_err("file root");
        assert!(matches!(err, ScanError::NotADirectory(_)), "{err:?}");
    }

    #[test]
    fn incomplete_manifest_is_skipped_not_fatal() {
        let temp = TempDir::new().expect("temp dir");
        write_manifest(temp.path(), "imu", &manifest("imu"));
        let mut broken = manifest("ignored");
        broken.as_object_mut().unwrap().remove("name");
        let broken_path = write_manifest(temp.path(), "motor", &broken);

        let catalog = scan(temp.path()).expect("scan succeeds");
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["imu"]);
        assert_eq!(catalog.skipped().len(), 1);
        assert_eq!(catalog.skipped()[0].descriptor_path, broken_path);
        assert!(catalog.skipped()[0].reason.contains("name"));
    }

    #[test]
    fn non_json_manifest_is_skipped() {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join("garbled");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE_NAME), "name = garbled").unwrap();

        let catalog = scan(temp.path()).expect("scan succeeds");
        assert!(catalog.is_empty());
        assert!(catalog.skipped()[0].reason.starts_with("invalid JSON"));
    }

    #[test]
    fn duplicate_names_resolve_to_last_directory() {
        let temp = TempDir::new().expect("temp dir");
        write_manifest(temp.path(), "a_first", &manifest("camera"));
        write_manifest(temp.path(), "b_second", &manifest("camera"));

        let catalog = scan(temp.path()).expect("scan succeeds");
        assert_eq!(catalog.len(), 1);
        let descriptor = catalog.get("camera").expect("camera present");
        assert_eq!(descriptor.root, temp.path().join("b_second"));
    }

    #[test]
    fn directories_without_manifest_and_loose_files_are_ignored() {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("empty")).unwrap();
        fs::write(temp.path().join(MANIFEST_FILE_NAME), "{}").unwrap();
        write_manifest(temp.path(), "gps", &manifest("gps"));

        let catalog = scan(temp.path()).expect("scan succeeds");
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["gps"]);
        assert!(catalog.skipped().is_empty());
    }

    #[test]
    fn paths_come_from_the_walk_not_the_file() {
        let temp = TempDir::new().expect("temp dir");
        let mut spoofed = manifest("sonar");
        spoofed["root"] = json!("/etc");
        spoofed["source"] = json!("sonar.cpp");
        let path = write_manifest(temp.path(), "sonar", &spoofed);

        let catalog = scan(temp.path()).expect("scan succeeds");
        let descriptor = catalog.get("sonar").unwrap();
        assert_eq!(descriptor.root, temp.path().join("sonar"));
        assert_eq!(descriptor.descriptor_path, path);
        assert_eq!(
            descriptor.source.as_deref(),
            Some(temp.path().join("sonar/sonar.cpp").as_path())
        );
    }
}

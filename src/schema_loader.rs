//! Embedded JSON Schemas for module manifests and compile-option documents.
//!
//! Both schemas ship inside the binary (see `schema/`) and are compiled once
//! per process. Validation returns every violation as a human-readable line
//! instead of short-circuiting so a skipped manifest can be logged with the
//! full list of problems.

use anyhow::{Result, anyhow};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::OnceLock;

const MANIFEST_SCHEMA: &str = include_str!("../schema/module_manifest.schema.json");
const COMPILE_OPTIONS_SCHEMA: &str = include_str!("../schema/compile_options.schema.json");

/// A compiled validator plus the label used in diagnostics.
pub(crate) struct CompiledSchema {
    label: &'static str,
    compiled: JSONSchema,
}

impl CompiledSchema {
    fn compile(label: &'static str, raw: &str) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(raw).map_err(|err| anyhow!("parsing {label} schema: {err}"))?;
        // The compile error borrows `schema`; render it before the value drops.
        let compiled = JSONSchema::compile(&schema)
            .map_err(|err| anyhow!("compiling {label} schema: {err}"))?;
        Ok(Self { label, compiled })
    }

    pub(crate) fn label(&self) -> &'static str {
        self.label
    }

    /// Validate `instance`, collecting every violation.
    pub(crate) fn validate(&self, instance: &Value) -> std::result::Result<(), Vec<String>> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors
                .map(|err| {
                    let pointer = err.instance_path.to_string();
                    if pointer.is_empty() {
                        err.to_string()
                    } else {
                        format!("{pointer}: {err}")
                    }
                })
                .collect()),
        }
    }
}

fn cached(
    cell: &'static OnceLock<std::result::Result<CompiledSchema, String>>,
    label: &'static str,
    raw: &'static str,
) -> Result<&'static CompiledSchema> {
    cell.get_or_init(|| CompiledSchema::compile(label, raw).map_err(|err| format!("{err:#}")))
        .as_ref()
        .map_err(|err| anyhow!("{err}"))
}

/// Validator for `module.json` descriptors.
pub(crate) fn manifest_schema() -> Result<&'static CompiledSchema> {
    static CELL: OnceLock<std::result::Result<CompiledSchema, String>> = OnceLock::new();
    cached(&CELL, "module manifest", MANIFEST_SCHEMA)
}

/// Validator for the process-wide compile-options document.
pub(crate) fn compile_options_schema() -> Result<&'static CompiledSchema> {
    static CELL: OnceLock<std::result::Result<CompiledSchema, String>> = OnceLock::new();
    cached(&CELL, "compile options", COMPILE_OPTIONS_SCHEMA)
}

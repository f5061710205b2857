//! Process-wide configuration: compile options and runtime locations.
//!
//! `CompileOptions` comes from an optional JSON document
//! (`optimization_level`, `cplus_version`, `warnings`). A missing or
//! malformed document falls back to the fixed defaults wholesale; a valid
//! document that omits a field falls back for that field only. The loaded
//! value is shared read-only (`Arc`) by every compile.

use crate::runtime::split_list;
use crate::schema_loader::compile_options_schema;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_OPTIMIZATION_LEVEL: &str = "-O2";
pub const DEFAULT_LANGUAGE_STANDARD: &str = "-std=c++17";
pub const DEFAULT_WARNINGS: &str = "-Wall";

pub const ROOT_ENV: &str = "MODRUNNER_ROOT";
pub const OUTPUT_DIR_ENV: &str = "MODRUNNER_OUTPUT_DIR";
pub const COMPILER_ENV: &str = "MODRUNNER_CXX";
pub const COMPILE_OPTIONS_ENV: &str = "MODRUNNER_COMPILE_OPTIONS";

const DEFAULT_ROOT: &str = "modules";
const DEFAULT_OUTPUT_DIR: &str = "build/modules";

fn default_optimization_level() -> String {
    DEFAULT_OPTIMIZATION_LEVEL.to_string()
}

fn default_language_standard() -> String {
    DEFAULT_LANGUAGE_STANDARD.to_string()
}

fn default_warnings() -> String {
    DEFAULT_WARNINGS.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// User-tunable part of the compiler command line.
pub struct CompileOptions {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: String,
    #[serde(rename = "cplus_version", default = "default_language_standard")]
    pub language_standard: String,
    #[serde(default = "default_warnings")]
    pub warnings: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimization_level: default_optimization_level(),
            language_standard: default_language_standard(),
            warnings: default_warnings(),
        }
    }
}

impl CompileOptions {
    /// Parse an options document, validating it against the embedded schema.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("parsing compile options")?;
        let schema = compile_options_schema()?;
        if let Err(errors) = schema.validate(&value) {
            bail!("compile options failed validation:\n{}", errors.join("\n"));
        }
        serde_json::from_value(value).context("decoding compile options")
    }

    /// Strict load from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading compile options {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("loading {}", path.display()))
    }

    /// Load from `path` when given, falling back to defaults on any failure.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("no compile options document; using defaults");
            return Self::default();
        };
        match Self::from_path(path) {
            Ok(options) => options,
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(
                    path = %path.display(),
                    error = %detail,
                    "falling back to default compile options"
                );
                Self::default()
            }
        }
    }

    /// Tokenized flags in command-line order: optimization, standard, warnings.
    pub fn flags(&self) -> Vec<String> {
        let mut flags = split_list(&self.optimization_level);
        flags.extend(split_list(&self.language_standard));
        flags.extend(split_list(&self.warnings));
        flags
    }

    /// The flags joined back into one string, as recorded in cache entries.
    pub fn option_string(&self) -> String {
        self.flags().join(" ")
    }
}

#[derive(Debug, Clone)]
/// Where the runtime looks for add-ons, writes artifacts, and finds its tools.
pub struct RuntimeConfig {
    pub module_root: PathBuf,
    pub output_dir: PathBuf,
    pub compiler: Option<String>,
    pub compile_options_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            module_root: PathBuf::from(DEFAULT_ROOT),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            compiler: None,
            compile_options_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `MODRUNNER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = non_empty_env(ROOT_ENV) {
            config.module_root = PathBuf::from(root);
        }
        if let Some(dir) = non_empty_env(OUTPUT_DIR_ENV) {
            config.output_dir = PathBuf::from(dir);
        }
        config.compiler = non_empty_env(COMPILER_ENV);
        config.compile_options_path = non_empty_env(COMPILE_OPTIONS_ENV).map(PathBuf::from);
        config
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions::load_or_default(self.compile_options_path.as_deref())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

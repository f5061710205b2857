//! Native compiler front-end.
//!
//! Turns a C++ source string into a loadable artifact at
//! `<output_dir>/<module>.<dll extension>`. Every compile runs a syntax-only
//! pass first (source on stdin) and only then the full build; both passes go
//! through a `CommandRunner` so the external process stays swappable. Results
//! are cached per `<module>::<entry>` for the lifetime of the `Compiler`;
//! since a module's entries share one artifact path, only the entry that
//! built the file currently on disk is ever served from the cache.
//!
//! The compiler never loads what it builds; that is the registry's job.

pub mod cache;
pub mod command;

use crate::config::{CompileOptions, RuntimeConfig};
use crate::runtime::{artifact_file_name, resolve_compiler, split_list};
use cache::CompilationCache;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use cache::{CacheEntry, CacheKey, SourceDigest};
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};

/// Flags appended to every full build: position-independent shared object.
const FIXED_BUILD_FLAGS: &[&str] = &["-shared", "-fPIC"];

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("syntax check failed for module '{module}':\n{diagnostic}")]
    SyntaxError { module: String, diagnostic: String },

    #[error("compilation failed for module '{module}':\n{diagnostic}")]
    CompileFailed { module: String, diagnostic: String },

    #[error("no C++ compiler found; set MODRUNNER_CXX or put c++ on PATH")]
    CompilerUnavailable,
}

impl CompileError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        CompileError::Io {
            context: context.into(),
            source,
        }
    }

    /// Captured compiler output, for the variants that carry one.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            CompileError::SyntaxError { diagnostic, .. }
            | CompileError::CompileFailed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

pub struct Compiler {
    program: PathBuf,
    output_dir: PathBuf,
    options: Arc<CompileOptions>,
    runner: Box<dyn CommandRunner>,
    cache: CompilationCache,
}

impl Compiler {
    /// Compiler driving `program`, writing artifacts under `output_dir`.
    pub fn new(
        program: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        options: Arc<CompileOptions>,
    ) -> Self {
        Self {
            program: program.into(),
            output_dir: output_dir.into(),
            options,
            runner: Box::new(ProcessRunner),
            cache: CompilationCache::default(),
        }
    }

    /// Resolve the compiler and options from runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, CompileError> {
        let program =
            resolve_compiler(config.compiler.as_deref()).ok_or(CompileError::CompilerUnavailable)?;
        debug!(compiler = %program.display(), "resolved C++ compiler");
        Ok(Self::new(
            program,
            config.output_dir.clone(),
            Arc::new(config.compile_options()),
        ))
    }

    /// Replace the process runner (tests count invocations this way).
    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Deterministic artifact location for `module_name`.
    pub fn artifact_path(&self, module_name: &str) -> PathBuf {
        self.output_dir.join(artifact_file_name(module_name))
    }

    /// Compile `source` for `module_name`, reusing the cached artifact when the
    /// same key was already built from the same source.
    ///
    /// A cached entry built from different source text is invalidated and
    /// rebuilt rather than returned stale.
    pub fn compile(
        &self,
        source: &str,
        module_name: &str,
        entry_name: &str,
    ) -> Result<PathBuf, CompileError> {
        validate_arguments(source, module_name, entry_name)?;

        let key = CacheKey::new(module_name, entry_name);
        let digest = SourceDigest::of(source);
        // Every entry of a module shares one artifact path, so builds are
        // serialized per module and the slot records which key wrote it last.
        let slot = self.cache.slot(module_name);
        let mut cached = slot.lock();

        if let Some(entry) = cached.as_ref() {
            if entry.serves(&key, digest) {
                debug!(%key, artifact = %entry.artifact.display(), "compile cache hit");
                return Ok(entry.artifact.clone());
            }
            if entry.key == key {
                warn!(%key, "source changed since last build; invalidating cached artifact");
            } else {
                debug!(
                    %key,
                    previous = %entry.key,
                    "artifact holds another entry's build; rebuilding"
                );
            }
            *cached = None;
        }

        self.ensure_output_dir()?;
        self.check_syntax(source, module_name)?;
        let artifact = self.build(source, module_name)?;

        info!(%key, artifact = %artifact.display(), "compiled module");
        *cached = Some(CacheEntry {
            key,
            artifact: artifact.clone(),
            options: self.options.option_string(),
            source_digest: digest,
        });
        Ok(artifact)
    }

    /// Cached entry for a key, if its build is still the one on disk.
    pub fn cached(&self, module_name: &str, entry_name: &str) -> Option<CacheEntry> {
        self.cache.get(&CacheKey::new(module_name, entry_name))
    }

    /// Explicitly drop a cache entry; the next compile rebuilds.
    pub fn invalidate(&self, module_name: &str, entry_name: &str) -> bool {
        let key = CacheKey::new(module_name, entry_name);
        let removed = self.cache.invalidate(&key);
        if removed {
            debug!(%key, "invalidated compile cache entry");
        }
        removed
    }

    /// Number of cached artifacts.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn ensure_output_dir(&self) -> Result<(), CompileError> {
        fs::create_dir_all(&self.output_dir).map_err(|err| {
            CompileError::io(
                format!("creating output directory {}", self.output_dir.display()),
                err,
            )
        })
    }

    fn check_syntax(&self, source: &str, module_name: &str) -> Result<(), CompileError> {
        let spec = CommandSpec::new(self.program.as_os_str())
            .arg("-fsyntax-only")
            .args(split_list(&self.options.language_standard))
            .args(["-x", "c++", "-"]);
        debug!(command = %spec.display(), module = module_name, "syntax check");

        let output = self.run(&spec, source)?;
        if output.success {
            return Ok(());
        }
        if output.crashed() {
            return Err(CompileError::CompileFailed {
                module: module_name.to_string(),
                diagnostic: output.diagnostic(),
            });
        }
        Err(CompileError::SyntaxError {
            module: module_name.to_string(),
            diagnostic: output.diagnostic(),
        })
    }

    fn build(&self, source: &str, module_name: &str) -> Result<PathBuf, CompileError> {
        let final_path = self.artifact_path(module_name);
        // Build into a sibling temp file and rename only after a verified
        // success, so a failed build never leaves a partial artifact behind.
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{module_name}."))
            .suffix(&format!(".{}", std::env::consts::DLL_EXTENSION))
            .tempfile_in(&self.output_dir)
            .map_err(|err| {
                CompileError::io(
                    format!("creating staging file in {}", self.output_dir.display()),
                    err,
                )
            })?
            .into_temp_path();

        let spec = CommandSpec::new(self.program.as_os_str())
            .args(self.options.flags())
            .args(FIXED_BUILD_FLAGS.iter().copied())
            .args(["-x", "c++", "-", "-o"])
            .arg(staging.as_os_str());
        debug!(command = %spec.display(), module = module_name, "full compile");

        let output = self.run(&spec, source)?;
        if !output.success {
            return Err(CompileError::CompileFailed {
                module: module_name.to_string(),
                diagnostic: output.diagnostic(),
            });
        }

        let produced = fs::metadata(&staging).map(|meta| meta.len()).unwrap_or(0);
        if produced == 0 {
            return Err(CompileError::CompileFailed {
                module: module_name.to_string(),
                diagnostic: format!(
                    "compiler exited successfully but produced no artifact\n{}",
                    output.diagnostic()
                ),
            });
        }

        staging.persist(&final_path).map_err(|err| {
            CompileError::io(
                format!("moving artifact into place at {}", final_path.display()),
                err.error,
            )
        })?;
        Ok(final_path)
    }

    fn run(&self, spec: &CommandSpec, source: &str) -> Result<CommandOutput, CompileError> {
        self.runner
            .run(spec, source.as_bytes())
            .map_err(|err| CompileError::io(format!("running {}", spec.display()), err))
    }
}

fn validate_arguments(source: &str, module_name: &str, entry_name: &str) -> Result<(), CompileError> {
    if source.trim().is_empty() {
        return Err(CompileError::InvalidArgument("source is empty".to_string()));
    }
    if module_name.trim().is_empty() {
        return Err(CompileError::InvalidArgument("module name is empty".to_string()));
    }
    if entry_name.trim().is_empty() {
        return Err(CompileError::InvalidArgument("entry name is empty".to_string()));
    }
    // The module name becomes a file name inside the output directory.
    let mut components = Path::new(module_name).components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none();
    if !single_normal || module_name.contains(['/', '\\']) {
        return Err(CompileError::InvalidArgument(format!(
            "module name '{module_name}' must be a plain file name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::ffi::OsString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Stand-in compiler: fails the syntax pass when the source contains
    /// `SYNTAX_ERROR`, writes a fake artifact to the `-o` target otherwise.
    #[derive(Clone, Default)]
    struct FakeRunner {
        calls: Arc<AtomicUsize>,
        specs: Arc<Mutex<Vec<CommandSpec>>>,
        build_delay: Option<Duration>,
        fail_build: bool,
        /// Write the source text itself as the artifact.
        echo_source: bool,
    }

    impl FakeRunner {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec, stdin: &[u8]) -> io::Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.specs.lock().push(spec.clone());
            let source = String::from_utf8_lossy(stdin);

            if spec.args.iter().any(|arg| arg == "-fsyntax-only") {
                if source.contains("SYNTAX_ERROR") {
                    return Ok(CommandOutput::exited(
                        1,
                        "",
                        "<stdin>:1:10: error: expected ';' after top level declarator\n",
                    ));
                }
                return Ok(CommandOutput::exited(0, "", ""));
            }

            if let Some(delay) = self.build_delay {
                std::thread::sleep(delay);
            }
            if self.fail_build {
                return Ok(CommandOutput::exited(1, "", "ld: undefined symbol\n"));
            }
            let out = spec
                .args
                .iter()
                .position(|arg| arg == "-o")
                .and_then(|idx| spec.args.get(idx + 1))
                .expect("build passes -o");
            if self.echo_source {
                fs::write(out, stdin)?;
            } else {
                fs::write(out, b"\x7fELF fake artifact")?;
            }
            Ok(CommandOutput::exited(0, "", ""))
        }
    }

    fn compiler(temp: &TempDir, runner: FakeRunner) -> Compiler {
        Compiler::new(
            "c++",
            temp.path().join("out"),
            Arc::new(CompileOptions::default()),
        )
        .with_runner(runner)
    }

    const SOURCE: &str = "extern \"C\" int add(int a, int b) { return a + b; }\n";

    #[test]
    fn rejects_empty_arguments() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner::default();
        let compiler = compiler(&temp, runner.clone());
        for (source, module, entry) in [("", "m", "f"), (SOURCE, "", "f"), (SOURCE, "m", " ")] {
            let err = compiler.compile(source, module, entry).expect_err("must reject");
            assert!(matches!(err, CompileError::InvalidArgument(_)), "{err:?}");
        }
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn rejects_module_names_that_escape_output_dir() {
        let temp = TempDir::new().expect("temp dir");
        let compiler = compiler(&temp, FakeRunner::default());
        for module in ["../evil", "nested/name", ".."] {
            let err = compiler.compile(SOURCE, module, "f").expect_err("must reject");
            assert!(matches!(err, CompileError::InvalidArgument(_)), "{module}: {err:?}");
        }
    }

    #[test]
    fn second_compile_hits_cache() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner::default();
        let compiler = compiler(&temp, runner.clone());

        let first = compiler.compile(SOURCE, "math", "add").expect("first compile");
        assert_eq!(runner.calls(), 2, "syntax check plus build");
        let second = compiler.compile(SOURCE, "math", "add").expect("cached compile");

        assert_eq!(first, second);
        assert_eq!(runner.calls(), 2, "cache hit must not invoke the compiler");
        assert_eq!(first, temp.path().join("out").join(artifact_file_name("math")));
        assert!(first.is_file());
        let entry = compiler.cached("math", "add").expect("entry recorded");
        assert_eq!(entry.options, "-O2 -std=c++17 -Wall");
    }

    #[test]
    fn syntax_error_stops_before_full_compile() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner::default();
        let compiler = compiler(&temp, runner.clone());

        let err = compiler
            .compile("int x = 1 SYNTAX_ERROR", "broken", "init")
            .expect_err("syntax error");
        match &err {
            CompileError::SyntaxError { module, diagnostic } => {
                assert_eq!(module, "broken");
                assert!(diagnostic.contains("expected ';'"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(runner.calls(), 1);
        assert!(!compiler.artifact_path("broken").exists());
        assert!(compiler.cached("broken", "init").is_none());
    }

    #[test]
    fn failed_build_leaves_no_artifact() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner {
            fail_build: true,
            ..FakeRunner::default()
        };
        let compiler = compiler(&temp, runner.clone());

        let err = compiler.compile(SOURCE, "math", "add").expect_err("build fails");
        assert_eq!(err.diagnostic(), Some("ld: undefined symbol\n"));
        assert!(!compiler.artifact_path("math").exists());
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("out"))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(leftovers.is_empty(), "staging file must be removed");
        assert_eq!(compiler.cache_len(), 0);
    }

    #[test]
    fn build_command_carries_options_and_fixed_flags() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner::default();
        let options = CompileOptions {
            optimization_level: "-O0 -g".to_string(),
            ..CompileOptions::default()
        };
        let compiler = Compiler::new("c++", temp.path().join("out"), Arc::new(options))
            .with_runner(runner.clone());
        compiler.compile(SOURCE, "math", "add").expect("compile");

        let specs = runner.specs.lock();
        let build: Vec<String> = specs[1]
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&build[..6], ["-O0", "-g", "-std=c++17", "-Wall", "-shared", "-fPIC"]);
        assert!(build.contains(&"-o".to_string()));
        assert_eq!(specs[0].args[0], OsString::from("-fsyntax-only"));
    }

    #[test]
    fn changed_source_recompiles() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner::default();
        let compiler = compiler(&temp, runner.clone());

        compiler.compile(SOURCE, "math", "add").expect("first");
        let updated = "extern \"C\" int add(int a, int b) { return b + a; }\n";
        compiler.compile(updated, "math", "add").expect("second");
        assert_eq!(runner.calls(), 4);
        assert_eq!(
            compiler.cached("math", "add").map(|e| e.source_digest),
            Some(SourceDigest::of(updated))
        );
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner::default();
        let compiler = compiler(&temp, runner.clone());

        compiler.compile(SOURCE, "math", "add").expect("first");
        assert!(compiler.invalidate("math", "add"));
        assert!(!compiler.invalidate("math", "add"));
        compiler.compile(SOURCE, "math", "add").expect("rebuild");
        assert_eq!(runner.calls(), 4);
    }

    #[test]
    fn concurrent_same_key_compiles_once() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner {
            build_delay: Some(Duration::from_millis(50)),
            ..FakeRunner::default()
        };
        let compiler = compiler(&temp, runner.clone());

        let paths: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| compiler.compile(SOURCE, "math", "add")))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread").expect("compile"))
                .collect()
        });

        assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(runner.calls(), 2);
    }

    #[test]
    fn distinct_keys_compile_independently() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner::default();
        let compiler = compiler(&temp, runner.clone());

        let (a, b) = std::thread::scope(|scope| {
            let a = scope.spawn(|| compiler.compile(SOURCE, "left", "add"));
            let b = scope.spawn(|| compiler.compile(SOURCE, "right", "add"));
            (a.join().expect("thread"), b.join().expect("thread"))
        });
        assert_ne!(a.expect("left"), b.expect("right"));
        assert_eq!(runner.calls(), 4);
        assert_eq!(compiler.cache_len(), 2);
    }

    #[test]
    fn entries_sharing_an_artifact_never_serve_each_others_build() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner {
            echo_source: true,
            ..FakeRunner::default()
        };
        let compiler = compiler(&temp, runner.clone());
        let init_source = "extern \"C\" void init() {}\n";
        let other_source = "extern \"C\" void other() {}\n";

        let init = compiler.compile(init_source, "m", "init").expect("init");
        let other = compiler.compile(other_source, "m", "other").expect("other");
        assert_eq!(init, other);
        assert!(compiler.cached("m", "init").is_none());

        let again = compiler.compile(init_source, "m", "init").expect("init again");
        assert_eq!(fs::read_to_string(&again).unwrap(), init_source);
        assert_eq!(runner.calls(), 6, "init must be rebuilt after other overwrote it");
        assert!(compiler.cached("m", "other").is_none());
        assert_eq!(
            compiler.cached("m", "init").map(|e| e.key),
            Some(CacheKey::new("m", "init"))
        );
        assert_eq!(compiler.cache_len(), 1);
    }

    #[test]
    fn concurrent_entries_of_one_module_build_one_at_a_time() {
        let temp = TempDir::new().expect("temp dir");
        let runner = FakeRunner {
            echo_source: true,
            build_delay: Some(Duration::from_millis(50)),
            ..FakeRunner::default()
        };
        let compiler = compiler(&temp, runner.clone());
        let sources = [
            ("init", "extern \"C\" void init() {}\n"),
            ("other", "extern \"C\" void other() {}\n"),
        ];

        std::thread::scope(|scope| {
            for (entry, source) in sources {
                let compiler = &compiler;
                scope.spawn(move || compiler.compile(source, "m", entry).expect("compile"));
            }
        });

        let live: Vec<_> = sources
            .iter()
            .filter_map(|(entry, source)| compiler.cached("m", entry).map(|e| (e, *source)))
            .collect();
        assert_eq!(live.len(), 1, "exactly one entry owns the artifact");
        let (entry, source) = &live[0];
        assert_eq!(fs::read_to_string(&entry.artifact).unwrap(), *source);
        assert_eq!(runner.calls(), 4);
    }

    #[test]
    fn unusable_output_dir_is_io_error() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "file in the way").unwrap();
        let runner = FakeRunner::default();
        let compiler = Compiler::new(
            "c++",
            blocker.join("out"),
            Arc::new(CompileOptions::default()),
        )
        .with_runner(runner.clone());

        let err = compiler.compile(SOURCE, "math", "add").expect_err("io");
        assert!(matches!(err, CompileError::Io { .. }), "{err:?}");
        assert_eq!(runner.calls(), 0);
    }
}

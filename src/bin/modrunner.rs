//! Operator CLI for the module runtime.
//!
//! Subcommands print a single JSON document on stdout; diagnostics and
//! tracing output go to stderr.
//!
//! - `scan [ROOT]` lists the catalog plus any skipped manifests.
//! - `compile --module NAME [--entry NAME] SOURCE` builds one artifact.
//! - `activate [--root ROOT] NAME...` scans, builds as needed, loads each
//!   module, and reports what ended up resident.

use anyhow::{Context, Result, bail};
use modrunner::logging::init_tracing;
use modrunner::{
    Compiler, DEFAULT_ENTRY_NAME, ModuleRegistry, RuntimeConfig, activate_selected, scan,
};
use serde_json::{Value, json};
use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse()?;
    init_tracing(cli.verbose);
    let config = RuntimeConfig::from_env();

    let report = match cli.command {
        CliCommand::Scan { root } => run_scan(root.unwrap_or(config.module_root))?,
        CliCommand::Compile {
            module,
            entry,
            source,
        } => run_compile(&config, &module, &entry, source)?,
        CliCommand::Activate { root, names } => {
            run_activate(&config, root.unwrap_or_else(|| config.module_root.clone()), &names)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

struct Cli {
    verbose: bool,
    command: CliCommand,
}

enum CliCommand {
    Scan {
        root: Option<PathBuf>,
    },
    Compile {
        module: String,
        entry: String,
        source: PathBuf,
    },
    Activate {
        root: Option<PathBuf>,
        names: Vec<String>,
    },
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1).peekable();
        let mut verbose = false;

        while let Some(arg) = args.peek() {
            match arg.as_str() {
                "-v" | "--verbose" => {
                    verbose = true;
                    args.next();
                }
                "-h" | "--help" => usage(0),
                _ => break,
            }
        }

        let Some(subcommand) = args.next() else {
            usage(1);
        };

        let mut root = None;
        let mut module = None;
        let mut entry = None;
        let mut positionals = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--root" => root = Some(PathBuf::from(required_value(&mut args, "--root")?)),
                "--module" => module = Some(required_value(&mut args, "--module")?),
                "--entry" => entry = Some(required_value(&mut args, "--entry")?),
                "-v" | "--verbose" => verbose = true,
                "-h" | "--help" => usage(0),
                _ if arg.starts_with("--") => bail!("Unknown option: {arg}"),
                _ => positionals.push(arg),
            }
        }

        let command = match subcommand.as_str() {
            "scan" => {
                if positionals.len() > 1 {
                    usage(1);
                }
                CliCommand::Scan {
                    root: root.or_else(|| positionals.pop().map(PathBuf::from)),
                }
            }
            "compile" => {
                let Some(module) = module else {
                    bail!("compile requires --module NAME");
                };
                if positionals.len() != 1 {
                    usage(1);
                }
                CliCommand::Compile {
                    module,
                    entry: entry.unwrap_or_else(|| DEFAULT_ENTRY_NAME.to_string()),
                    source: PathBuf::from(&positionals[0]),
                }
            }
            "activate" => {
                if positionals.is_empty() {
                    bail!("activate requires at least one module name");
                }
                CliCommand::Activate {
                    root,
                    names: positionals,
                }
            }
            other => bail!("Unknown command: {other}"),
        };

        Ok(Self { verbose, command })
    }
}

fn required_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("Missing value for {flag}"))
}

fn usage(code: i32) -> ! {
    eprintln!(
        "Usage: modrunner [-v] <command> [args]\n\nCommands:\n  scan [ROOT]                               List module manifests under ROOT.\n  compile --module NAME [--entry NAME] SRC  Compile SRC into a loadable artifact.\n  activate [--root ROOT] NAME...            Build (if needed) and load catalog entries.\n\nEnvironment:\n  MODRUNNER_ROOT             Default module root (./modules).\n  MODRUNNER_OUTPUT_DIR       Artifact directory (./build/modules).\n  MODRUNNER_CXX              C++ compiler to invoke.\n  MODRUNNER_COMPILE_OPTIONS  JSON document with optimization_level, cplus_version, warnings.\n  MODRUNNER_LOG              tracing filter directive."
    );
    std::process::exit(code);
}

fn run_scan(root: PathBuf) -> Result<Value> {
    let catalog = scan(&root).with_context(|| format!("scanning {}", root.display()))?;
    Ok(serde_json::to_value(&catalog)?)
}

fn run_compile(config: &RuntimeConfig, module: &str, entry: &str, source: PathBuf) -> Result<Value> {
    let text = fs::read_to_string(&source)
        .with_context(|| format!("reading source {}", source.display()))?;
    let compiler = Compiler::from_config(config)?;
    let artifact = compiler
        .compile(&text, module, entry)
        .with_context(|| format!("compiling {}", source.display()))?;
    Ok(json!({
        "module": module,
        "entry": entry,
        "artifact": artifact,
        "options": compiler.options().option_string(),
    }))
}

fn run_activate(config: &RuntimeConfig, root: PathBuf, names: &[String]) -> Result<Value> {
    let catalog = scan(&root).with_context(|| format!("scanning {}", root.display()))?;
    let compiler = Compiler::from_config(config)?;
    let registry = ModuleRegistry::new();

    let outcomes = activate_selected(&catalog, names, &compiler, &registry);
    let mut failures = 0;
    let results: Vec<Value> = outcomes
        .into_iter()
        .map(|(name, outcome)| match outcome {
            Ok(activation) => json!({ "name": name, "ok": true, "activation": activation }),
            Err(err) => {
                failures += 1;
                json!({ "name": name, "ok": false, "error": format!("{err:#}") })
            }
        })
        .collect();

    let resident: Vec<Value> = registry
        .list_modules()
        .iter()
        .filter_map(|name| registry.module_info(name))
        .map(|info| json!(info))
        .collect();

    if failures == names.len() {
        bail!(
            "no modules activated:\n{}",
            serde_json::to_string_pretty(&results)?
        );
    }

    Ok(json!({
        "root": root,
        "results": results,
        "resident": resident,
    }))
}

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=CXX");
    println!("cargo:rerun-if-env-changed=MODRUNNER_CXX_HINT");

    let hint = env::var("MODRUNNER_CXX_HINT")
        .ok()
        .or_else(|| env::var("CXX").ok())
        .filter(|value| !value.trim().is_empty());

    if let Some(raw_hint) = hint {
        let candidate = PathBuf::from(raw_hint.trim());
        let canonical = candidate.canonicalize().unwrap_or(candidate);

        println!(
            "cargo:rustc-env=MODRUNNER_CXX_HINT={}",
            canonical.display()
        );
    }
}

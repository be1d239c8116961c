//! Subcommand implementations. Each returns the text printed on stdout.

use std::path::{Path, PathBuf};
use warden_core::CoreResult;
use warden_policy::{EnforcerAssembler, FunctionMap, InputRole, InspectionEngine, Materializer};

/// `version`
#[must_use]
pub fn version() -> String {
    format!(
        "CLI version: {}\nLibrary version: {}",
        env!("CARGO_PKG_VERSION"),
        warden_policy::VERSION
    )
}

/// `match <function> <subject> <pattern>`
///
/// # Errors
///
/// Returns error if `function` is not a built-in matcher
pub fn match_function(function: &str, subject: &str, pattern: &str) -> CoreResult<String> {
    let matched = FunctionMap::builtin().call(function, subject, pattern)?;
    tracing::debug!(function, subject, pattern, matched, "evaluated matcher");
    Ok(matched.to_string())
}

/// `inspect --model <m> --policy <p>`
///
/// # Errors
///
/// Returns error if either input is invalid or the files cannot be loaded
pub fn inspect(model: &str, policy: &str, staging_dir: Option<&Path>) -> CoreResult<String> {
    let assembler = EnforcerAssembler::new(InspectionEngine).with_materializer(materializer(staging_dir));
    let assembly = assembler.assemble(Some(model), Some(policy))?;
    let summary = assembly.context().summary();
    Ok(serde_json::to_string_pretty(&summary)?)
}

/// `stage --role <role> <input>`: prints the path of a file that outlives the process
///
/// # Errors
///
/// Returns error if the input is invalid or cannot be written
pub fn stage(role: InputRole, input: &str, staging_dir: Option<&Path>) -> CoreResult<String> {
    let staged = materializer(staging_dir).materialize(role, Some(input))?;
    let path: PathBuf = staged.keep()?;
    Ok(path.display().to_string())
}

fn materializer(dir: Option<&Path>) -> Materializer {
    match dir {
        Some(dir) => Materializer::in_dir(dir),
        None => Materializer::new(),
    }
}

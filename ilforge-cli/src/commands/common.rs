use std::path::Path;

use anyhow::Context;
use ilforge::{
    compiler::ReplacementConfig, diagnostics::Diagnostics, metadata::MethodId, Compiler,
    CompilerSettings, ExecutionSet,
};
use serde::de::DeserializeOwned;

use crate::{
    app::BuildOptions,
    model::{load_program, resolve_entry, Program},
};

/// A compiled program together with the model it was built from.
pub struct Build {
    pub program: Program,
    pub main: MethodId,
    pub set: ExecutionSet,
    pub diagnostics: Diagnostics,
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what}: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {what}: {}", path.display()))
}

/// The settings file named by `options`, or the defaults.
pub fn load_settings(options: &BuildOptions) -> anyhow::Result<CompilerSettings> {
    match &options.settings {
        Some(path) => read_json(path, "settings"),
        None => Ok(CompilerSettings::default()),
    }
}

/// Load the program, settings and replacements named by `options` and compile the entry point.
pub fn build(options: &BuildOptions) -> anyhow::Result<Build> {
    build_with(options, load_settings(options)?)
}

/// Like [`build`], with settings the caller already adjusted.
pub fn build_with(options: &BuildOptions, settings: CompilerSettings) -> anyhow::Result<Build> {
    let program = load_program(&options.program)?;
    let main = resolve_entry(&program, options.entry.as_deref())?;

    let replacements: Vec<ReplacementConfig> = match &options.replacements {
        Some(path) => read_json(path, "replacements")?,
        None => Vec::new(),
    };

    let mut compiler = Compiler::new(&program.universe, &replacements)
        .context("invalid replacement configuration")?;
    let compilation = compiler
        .compile(&program.universe, main, &settings)
        .with_context(|| {
            format!(
                "failed to compile {}",
                program.universe.method_signature(main)
            )
        })?;
    if compilation.diagnostics.has_errors() {
        log::warn!(
            "Build of {} reported errors, the program will likely fail on the board",
            program.universe.method_signature(main)
        );
    }

    Ok(Build {
        program,
        main,
        set: compilation.set,
        diagnostics: compilation.diagnostics,
    })
}

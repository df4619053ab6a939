mod app;
mod commands;
mod model;
mod output;
mod tcp;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // ilforge info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("ilforge", level)
            .filter_module("ilforge_cli", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Compile { build, members } => commands::compile::run(build, *members, &cli.global),
        Command::Run {
            build,
            host,
            args,
            no_static_constructors,
            timeout,
        } => commands::run::run(
            build,
            &commands::run::RunOptions {
                host,
                args,
                static_constructors: !*no_static_constructors,
                timeout: *timeout,
            },
            &cli.global,
        ),
        Command::Hardware { host } => commands::hardware::run(host, &cli.global),
    }
}

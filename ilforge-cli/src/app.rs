use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// ilforge - compile .NET IL programs for microcontroller execution engines and run them
#[derive(Debug, Parser)]
#[command(name = "ilforge", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// What to compile and how.
#[derive(Debug, Args)]
pub struct BuildOptions {
    /// Path to the JSON program description.
    #[arg(value_name = "PROGRAM")]
    pub program: PathBuf,

    /// Entry method as `Namespace.Type::Method`. Defaults to the only static `Main`.
    #[arg(long, value_name = "TYPE::METHOD")]
    pub entry: Option<String>,

    /// JSON file with compiler settings; missing keys keep their defaults.
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// JSON file with type, method and native replacements.
    #[arg(long, value_name = "FILE")]
    pub replacements: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Compile a program and report what an upload would send, without a board.
    Compile {
        #[command(flatten)]
        build: BuildOptions,

        /// List every class and method of the execution set.
        #[arg(long)]
        members: bool,
    },

    /// Compile a program, upload it to a board and run its entry point.
    Run {
        #[command(flatten)]
        build: BuildOptions,

        /// Address of the board bridge, e.g. 192.168.1.20:27016.
        #[arg(long, value_name = "HOST:PORT")]
        host: String,

        /// Integer argument passed to the entry point (repeatable).
        #[arg(long = "arg", value_name = "INT", allow_negative_numbers = true)]
        args: Vec<i32>,

        /// Skip the static constructors after the upload.
        #[arg(long)]
        no_static_constructors: bool,

        /// Seconds to wait for each command of the upload.
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// Query the hardware description of a board.
    Hardware {
        /// Address of the board bridge, e.g. 192.168.1.20:27016.
        #[arg(long, value_name = "HOST:PORT")]
        host: String,
    },
}

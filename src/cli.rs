//! CLI argument parsing for vartrace

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for trace summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "vartrace")]
#[command(version)]
#[command(about = "Inspect execution traces recorded by instrumented programs", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize a trace: event counts, functions, final variable values
    Summary {
        /// Trace file written by an instrumented program
        file: PathBuf,

        /// Output format (text or json)
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Check structural invariants; exits non-zero on violations
    Check {
        /// Trace file written by an instrumented program
        file: PathBuf,
    },

    /// Print events as JSON lines
    Events {
        /// Trace file written by an instrumented program
        file: PathBuf,

        /// Only events of this kind (e.g. func_enter, array_index_assign)
        #[arg(long = "kind", value_name = "KIND")]
        kind: Option<String>,

        /// Only events whose function matches this regex
        #[arg(long = "function", value_name = "REGEX")]
        function: Option<String>,
    },
}

//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use reqflow_config::WorkerKind;
use reqflow_orchestrator::Pipeline;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline over requirement text and print its output as JSON
    Run(RunArgs),

    /// Serve one worker over stdin/stdout (launched by `run`)
    #[command(hide = true)]
    Worker {
        /// Worker kind: collector, analyzer, requirement, reporter, vector
        kind: WorkerKind,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// File with the raw requirement text; `-` or nothing reads stdin
    #[arg(value_name = "FILE", conflicts_with = "text")]
    pub input: Option<PathBuf>,

    /// Requirement text given inline
    #[arg(long, value_name = "TEXT")]
    pub text: Option<String>,

    /// Pipeline to run
    #[arg(long, value_name = "NAME", default_value = "requirements-report", value_parser = Pipeline::NAMES)]
    pub pipeline: String,

    /// Query used to pick the most relevant chunks (semantic-analysis)
    #[arg(long, value_name = "TEXT")]
    pub query: Option<String>,

    /// Project identifier carried into the final report
    #[arg(long, value_name = "ID", default_value = "default")]
    pub project_id: String,

    /// Write the output to this file instead of stdout
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Include the run id and every stage result in the output
    #[arg(long)]
    pub with_stages: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path; stdout when omitted
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

use anyhow::{Context, Result};
use clap::Parser;
use reqflow_config::{ConfigLoader, LogFormat, LoggingConfig, ReqflowConfig, WorkerKind};
use reqflow_orchestrator::{Orchestrator, Pipeline, PipelineInput};
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Cli, Commands, ConfigCommands, RunArgs};

/// Load configuration from file or from environment and defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<ReqflowConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {:?}", path);
            }
            loader
                .from_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))
        }
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Filter from `--log-level`, else `RUST_LOG`, else the configured level
fn env_filter(logging: &LoggingConfig, log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", level);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.filter_directives())),
    }
}

/// Initialize logging on stderr; stdout carries the pipeline output
fn init_logging(logging: &LoggingConfig, log_level: Option<&str>) -> Result<()> {
    let filter = env_filter(logging, log_level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    let installed = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    debug!("Logging initialized");
    Ok(())
}

/// Initialize tracing for worker processes (stderr only, stdout is the protocol)
fn init_worker_tracing(logging: &LoggingConfig, log_level: Option<&str>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(logging, log_level))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize worker tracing: {}", e))?;

    debug!("Worker tracing initialized");
    Ok(())
}

/// Requirement text from `--text`, a file, or stdin
fn read_input(args: &RunArgs) -> Result<String> {
    if let Some(text) = &args.text {
        return Ok(text.clone());
    }
    match &args.input {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {:?}", path)),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read input from stdin")?;
            Ok(text)
        }
    }
}

async fn run_command(config: ReqflowConfig, args: &RunArgs) -> Result<()> {
    let pipeline = Pipeline::by_name(&args.pipeline)
        .with_context(|| format!("Unknown pipeline '{}'", args.pipeline))?;

    let text = read_input(args)?;
    if text.trim().is_empty() {
        anyhow::bail!("No requirement text given");
    }

    let mut input = PipelineInput::new(text).with_project_id(args.project_id.clone());
    if let Some(query) = &args.query {
        input = input.with_query(query.clone());
    }

    info!(pipeline = pipeline.name, "Running pipeline");
    let orchestrator = Orchestrator::new(config);

    // Dropping the run kills its workers
    let outcome = tokio::select! {
        outcome = orchestrator.run(&pipeline, input) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping workers");
            anyhow::bail!("Interrupted");
        }
    };

    let run = match outcome {
        Ok(run) => run,
        Err(failure) => {
            for exit in &failure.shutdown {
                debug!(worker = %exit.worker, outcome = ?exit.outcome, "Worker stopped");
            }
            return Err(failure.error.into());
        }
    };

    let output: JsonValue = if args.with_stages {
        json!({
            "run_id": run.run_id,
            "pipeline": pipeline.name,
            "output": run.output,
            "stages": run.context.stages(),
        })
    } else {
        run.output
    };
    let rendered = serde_json::to_string_pretty(&output)?;

    match &args.output {
        Some(path) => {
            fs::write(path, rendered + "\n")
                .with_context(|| format!("Failed to write output to {:?}", path))?;
            info!("Output written to {:?}", path);
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

async fn worker_command(config: ReqflowConfig, kind: WorkerKind) -> Result<()> {
    let stats = reqflow_workers::serve(kind, &config)
        .await
        .with_context(|| format!("{} worker stopped", kind))?;
    debug!(worker = %kind, handled = stats.handled, failed = stats.failed, "Worker exiting");
    Ok(())
}

/// Handle configuration validation
fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    match load_config(Some(config_file)) {
        Ok(_config) => {
            println!("Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {:#}", e);
            Err(e)
        }
    }
}

/// Handle configuration generation
fn handle_config_generate(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = ReqflowConfig::generate_sample();

    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        anyhow::bail!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    fs::write(output, sample).with_context(|| format!("Failed to write {:?}", output))?;
    println!("Configuration written to {:?}", output);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = cli.log_level.as_deref();

    match &cli.command {
        Commands::Worker { kind } => {
            let config = load_config(cli.config.as_ref())?;
            init_worker_tracing(&config.logging, log_level)?;
            worker_command(config, *kind).await
        }
        Commands::Run(args) => {
            let config = load_config(cli.config.as_ref())?;
            init_logging(&config.logging, log_level)?;
            run_command(config, args).await
        }
        Commands::Config { config_cmd } => {
            init_logging(&LoggingConfig::default(), log_level.or(Some("warn")))?;
            match config_cmd {
                ConfigCommands::Validate { config_file } => handle_config_validate(config_file),
                ConfigCommands::Generate { output, force } => {
                    handle_config_generate(output.as_ref(), *force)
                }
            }
        }
    }
}

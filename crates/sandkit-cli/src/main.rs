//! Command-line front end for running guest scripts in a sandbox
//!
//! Loads a sandbox configuration (file plus flag overrides), runs a script or calls
//! one of its functions, and prints the resulting outcome as JSON on stdout. Logs go
//! to stderr so stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use sandkit_core::{
    config::{ConfigLoader, SandboxBuilder},
    DependencySpec, ExecutionRequest, FunctionCall, RunnerKind, Sandbox, SandboxConfig,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Sandkit - Run untrusted scripts in a sandbox")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, help = "Sandbox configuration file (YAML)")]
    config: Option<PathBuf>,

    #[clap(long, help = "Runner backend: subprocess or docker")]
    runner: Option<RunnerKind>,

    #[clap(long, help = "Wall-clock timeout in seconds")]
    timeout: Option<f64>,

    #[clap(long, help = "Allow network access from the sandbox")]
    allow_network: bool,

    #[clap(long, help = "Offer this process's environment to the sandbox (still allow-list filtered)")]
    inherit_env: bool,

    #[clap(long = "dep", value_name = "NAME[:SPEC]", help = "Add a dependency, e.g. numpy:>=1.20")]
    deps: Vec<String>,

    #[clap(long, short, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script as-is and capture its output
    Run {
        file: PathBuf,
    },
    /// Call a function defined in a script and decode its JSON result
    Call {
        file: PathBuf,

        #[clap(long, short, default_value = "main")]
        function: String,

        #[clap(long, short, help = "Keyword arguments as a JSON object")]
        inputs: Option<String>,

        #[clap(long = "async", help = "The function is a coroutine")]
        is_async: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Warn);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let config = load_config(&cli).await?;
    let sandbox = Sandbox::new(config).context("Failed to set up sandbox")?;

    let request = match &cli.command {
        Commands::Run { file } => ExecutionRequest::script(read_code(file).await?),
        Commands::Call { file, function, inputs, is_async } => {
            let mut call = FunctionCall::new(function.clone());
            if let Some(inputs) = inputs {
                let value: serde_json::Value = serde_json::from_str(inputs)
                    .with_context(|| format!("Invalid --inputs JSON: {}", inputs))?;
                call = call.with_input_value(value);
            }
            if *is_async {
                call = call.asynchronous();
            }
            ExecutionRequest::function(read_code(file).await?, call)
        }
    };

    let result = sandbox.execute(&request).await;
    if let Err(e) = sandbox.cleanup().await {
        log::warn!("Sandbox cleanup failed: {}", e);
    }
    let outcome = result?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<SandboxConfig> {
    let base = match &cli.config {
        Some(path) => {
            log::info!("Loading configuration from file: {}", path.display());
            ConfigLoader::from_file(path).await?
        }
        None => SandboxConfig::default(),
    };

    let mut builder = SandboxBuilder::from_config(base);
    if let Some(runner) = cli.runner {
        builder = builder.runner(runner);
    }
    if let Some(secs) = cli.timeout {
        let timeout = Duration::try_from_secs_f64(secs)
            .map_err(|e| anyhow::anyhow!("Invalid --timeout '{}': {}", secs, e))?;
        builder = builder.timeout(timeout);
    }
    if cli.allow_network {
        builder = builder.allow_network(true);
    }
    if cli.inherit_env {
        builder = builder.inherit_host_environment(true);
    }
    for dep in &cli.deps {
        let (name, spec) = parse_dependency(dep);
        builder = builder.dependency(name, spec);
    }

    Ok(builder.build_config()?)
}

/// `numpy:>=1.20` -> (numpy, >=1.20); a bare name means any version
fn parse_dependency(raw: &str) -> (String, DependencySpec) {
    match raw.split_once(':') {
        Some((name, spec)) => (name.trim().to_string(), DependencySpec::from(spec.trim())),
        None => (raw.trim().to_string(), DependencySpec::any()),
    }
}

async fn read_code(file: &PathBuf) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read script {}", file.display()))
}

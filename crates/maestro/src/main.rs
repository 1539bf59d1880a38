use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use maestro::{Workflow, WorkflowRunner};
use serde_yaml::{Mapping, Value};
use tracing::{error, info};

/// Run a YAML-declared workflow.
#[derive(Parser, Debug)]
#[command(name = "maestro", version, about)]
struct Args {
    /// Path to the workflow document
    config_file: PathBuf,

    /// Workflow input, repeatable: --input KEY VALUE
    #[arg(long = "input", num_args = 2, value_names = ["KEY", "VALUE"])]
    inputs: Vec<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default.into());
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
    {
        eprintln!("Tracing subscriber not installed: {e}");
    }
}

fn input_mapping(pairs: &[String]) -> Mapping {
    pairs
        .chunks_exact(2)
        .map(|pair| (Value::from(pair[0].as_str()), Value::from(pair[1].as_str())))
        .collect()
}

async fn run(args: &Args) -> Result<()> {
    info!("Start workflow: [{}]", args.config_file.display());
    let workflow = match Workflow::load(&args.config_file).await {
        Ok(workflow) => workflow,
        Err(e) => bail!("failed to load {}: {e}", args.config_file.display()),
    };

    let summary = WorkflowRunner::new(maestro::registry(), workflow)
        .with_inputs(input_mapping(&args.inputs))
        .run()
        .await?;

    info!(
        steps = summary.steps_completed,
        "Finished workflow: [{}]",
        args.config_file.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

use clap::Parser;
use exif_worker::{
    cancel_pair, ConfigOverrides, ExtractionHandler, LocalStorage, TaskDescriptor, TaskError,
    TaskMetadata, TokioProcessRunner, WorkerConfig, WorkerExecutor,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "exif-worker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract embedded file metadata with ExifTool")]
struct Cli {
    /// Task descriptor JSON files to execute
    #[arg(required_unless_present_any = ["describe", "sample_config"])]
    tasks: Vec<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extraction tool binary
    #[arg(long)]
    binary: Option<String>,

    /// Per-input timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of tasks run at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the task registration metadata as JSON and exit
    #[arg(long)]
    describe: bool,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    sample_config: bool,

    /// Verbose logging (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.describe {
        return print_json(&TaskMetadata::describe());
    }
    if cli.sample_config {
        print!("{}", WorkerConfig::sample());
        return 0;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return 2;
        }
    };

    let handler = Arc::new(ExtractionHandler::from_config(
        TokioProcessRunner,
        LocalStorage,
        &config,
    ));
    let executor = Arc::new(WorkerExecutor::new(config.execution.concurrency));

    let (cancel, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight tasks");
            cancel.cancel();
        }
    });

    let descriptors = match read_tasks(&cli.tasks).await {
        Ok(descriptors) => descriptors,
        Err(code) => return code,
    };

    let mut tasks = JoinSet::new();
    for task in descriptors {
        let executor = executor.clone();
        let handler = handler.clone();
        let signal = signal.clone();
        tasks.spawn(async move {
            let task_id = task.task_id.clone();
            (task_id, executor.execute(handler, task, signal).await)
        });
    }

    let mut exit_code = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((task_id, Ok(result))) => {
                info!(%task_id, summary = %result.summary, "Task succeeded");
                print_json(&result);
            }
            Ok((task_id, Err(e))) => {
                error!(%task_id, error = %e, "Task failed");
                exit_code = match e {
                    TaskError::Cancelled { .. } => 130,
                    _ => 1,
                };
            }
            Err(e) => {
                error!(error = %e, "Task panicked");
                exit_code = 1;
            }
        }
    }

    exit_code
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "exif_worker=info",
        1 => "exif_worker=debug",
        _ => "exif_worker=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<WorkerConfig, exif_worker::ConfigError> {
    let mut config = WorkerConfig::load_with_defaults(cli.config.as_ref())?;
    config.apply_overrides(&ConfigOverrides {
        binary: cli.binary.clone(),
        timeout_secs: cli.timeout,
        concurrency: cli.concurrency,
    });
    config.validate()?;
    Ok(config)
}

/// Loads every descriptor up front so a bad file never interrupts tasks
/// that are already running.
async fn read_tasks(paths: &[PathBuf]) -> Result<Vec<TaskDescriptor>, i32> {
    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        match read_task(path).await {
            Ok(task) => descriptors.push(task),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load task descriptor");
                return Err(2);
            }
        }
    }
    Ok(descriptors)
}

async fn read_task(path: &Path) -> Result<TaskDescriptor, Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize output");
            1
        }
    }
}

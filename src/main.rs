//! opkernel - apply operations to the management model from the command line

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use opkernel::{render_state, restore_snapshot, BootOperations, KernelConfig};
use opkernel_controller::{ControllerMode, JsonFilePersister, ModelController};
use opkernel_core::ModelNode;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "opkernel", about = "Operation-execution kernel for a process management model")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "opkernel.toml")]
    config: PathBuf,

    /// Offline configuration editing: no runtime services
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Override the configuration snapshot path
    #[arg(long)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a boot file and print the resulting model
    Boot {
        /// JSON array of operation requests
        file: PathBuf,
    },
    /// Execute operation requests, optionally after a boot file
    Exec {
        #[arg(short, long)]
        boot: Option<PathBuf>,
        /// Operation requests as JSON objects
        #[arg(required = true)]
        requests: Vec<String>,
        /// Apply the compensating operation of the last request afterwards
        #[arg(long, default_value_t = false)]
        undo: bool,
    },
    /// Print the resource registry tree
    Describe,
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn init_tracing(config: &KernelConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.filter.as_str()));

    let (file_layer, guard) = match &config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "opkernel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

fn print_json(node: &ModelNode) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(node)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, source) = KernelConfig::read(&cli.config);
    if cli.offline {
        config.controller.mode = ControllerMode::AdminOnly;
    }
    if cli.snapshot.is_some() {
        config.persistence.path = cli.snapshot.clone();
    }
    let _guard = init_tracing(&config);
    source.log();

    let registry = opkernel_subsystems::standard_registry().context("registering extensions")?;

    if let Commands::Describe = cli.command {
        return print_json(&registry.root().describe());
    }
    if let Commands::DefaultConfig = cli.command {
        print!("{}", KernelConfig::default().to_toml());
        return Ok(());
    }

    let mut builder = ModelController::builder(registry).config(config.controller_config());
    let persister = config.persistence.path.as_ref().map(|path| JsonFilePersister::new(path.clone()));
    if let Some(persister) = &persister {
        builder = builder.persister(Arc::new(persister.clone()));
    }

    match cli.command {
        Commands::Boot { file } => {
            let operations = BootOperations::load(&file).with_context(|| format!("loading {}", file.display()))?;
            let controller = builder.start();
            let applied = controller.boot(operations.into_inner()).await?;
            tracing::info!("Applied {} boot operation(s)", applied);
            print_json(&controller.read_model().await)?;
        }
        Commands::Exec { boot, requests, undo } => {
            let snapshot = match boot {
                Some(_) => None,
                None => persister.as_ref().map(JsonFilePersister::load).transpose()?.flatten(),
            };
            let controller = builder.start();
            if let Some(snapshot) = snapshot {
                restore_snapshot(&controller, &snapshot).await.context("restoring snapshot")?;
            }
            if let Some(file) = boot {
                let operations = BootOperations::load(&file).with_context(|| format!("loading {}", file.display()))?;
                controller.boot(operations.into_inner()).await?;
            }

            let mut failed = false;
            for raw in &requests {
                let request: ModelNode = serde_json::from_str(raw).with_context(|| format!("parsing request {}", raw))?;
                let state = controller.execute_and_wait(request).await;
                failed |= !state.is_success();
                println!("{}", serde_json::to_string_pretty(&render_state(&state))?);
            }
            if undo {
                match controller.undo_last().await {
                    Some(state) => println!("{}", serde_json::to_string_pretty(&render_state(&state))?),
                    None => tracing::warn!("Nothing to undo"),
                }
            }
            if failed {
                bail!("one or more operations failed");
            }
        }
        Commands::Describe | Commands::DefaultConfig => {}
    }

    Ok(())
}

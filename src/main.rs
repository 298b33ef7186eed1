//! neuropipe - Main Entry Point

use clap::{Parser, Subcommand};
use neuropipe::api::ApiServer;
use neuropipe::config::{PipelineConfig, StagesSection};
use neuropipe::observability::{init_default_logging, init_logging, LogFormat};
use neuropipe::pipeline::{OutputPaths, PipelineService};
use neuropipe::stages::{CommandStage, StageSet};
use neuropipe::storage::FsArtifactStore;
use neuropipe::task::TaskRegistry;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, Level};

/// Task orchestration server for brain MRI analysis pipelines
#[derive(Parser)]
#[command(name = "neuropipe")]
#[command(about = "Task orchestration server for brain MRI analysis pipelines")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "NEUROPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["neuropipe.toml", "config/neuropipe.toml"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting neuropipe v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    let level = match verbose {
        0 => return init_default_logging(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    init_logging(level, format, false);
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(PipelineConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(PipelineConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create neuropipe.toml".into())
}

fn build_stages(stages: &StagesSection) -> StageSet {
    StageSet {
        segmentation: Arc::new(CommandStage::from_config(
            "segmentation",
            &stages.segmentation,
        )),
        features: Arc::new(CommandStage::from_config("features", &stages.features)),
        reports: Arc::new(CommandStage::from_config("reports", &stages.reports)),
    }
}

async fn serve(config: PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.ensure_directories()?;

    let registry = TaskRegistry::new();
    let sweeper = config.registry.retention().map(|retention| {
        info!(
            retention_secs = retention.as_secs(),
            interval_secs = config.registry.sweep_interval_secs,
            "Task retention enabled"
        );
        registry.spawn_retention_sweeper(retention, config.registry.sweep_interval())
    });
    if sweeper.is_none() {
        info!("Task retention disabled; finished tasks are kept until deleted");
    }

    let service = PipelineService::new(
        registry,
        Arc::new(FsArtifactStore::new(&config.storage.upload_dir)),
        build_stages(&config.stages),
        OutputPaths::new(&config.storage.output_dir, &config.storage.reports_dir),
    );
    let server = ApiServer::new(&config, service)?;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    server.run(shutdown).await?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    Ok(())
}

fn handle_config_command(
    config: &PipelineConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

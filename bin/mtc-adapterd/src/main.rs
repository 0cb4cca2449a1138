//! ---
//! mtc_section: "01-core-functionality"
//! mtc_subsection: "binary"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Adapter daemon driving a simulated machine tool."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
mod machine;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mtc_common::config::AppConfig;
use mtc_common::logging::{init_tracing, LogFormat};
use mtc_net::{Adapter, DeviceCommand};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::machine::{sample_tool, SimulatedMachine};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Machine tool adapter streaming pipe-delimited state to agents",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, env = "MTC_ADAPTER_PORT", help = "Override the listen port")]
    port: Option<u16>,

    #[arg(long, value_name = "MS", help = "Override the heartbeat interval; 0 disables it")]
    heartbeat_ms: Option<u64>,

    #[arg(long, help = "Log every outbound line")]
    verbose: bool,

    #[arg(long, value_enum, help = "Override the stdout log format")]
    log_format: Option<CliLogFormat>,

    #[arg(long, value_name = "MS", help = "Override the publish interval")]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Json => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve agents and drive the simulated machine")]
    Run,
    #[command(about = "Load and validate the configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/adapter.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));

    let explicit = cli.config.is_some() || std::env::var_os(AppConfig::ENV_CONFIG_PATH).is_some();
    let (mut config, source) = match AppConfig::load_with_source(&candidates) {
        Ok(loaded) => (loaded.config, Ok(loaded.source)),
        Err(err) if !explicit => (AppConfig::default(), Err(err)),
        Err(err) => return Err(err),
    };
    apply_overrides(&mut config, &cli);
    config.validate().context("invalid configuration after CLI overrides")?;

    init_tracing("mtc-adapterd", &config.logging)?;
    match &source {
        Ok(path) => info!(config_path = %path.display(), "configuration loaded"),
        Err(err) => warn!(error = %err, "no configuration file found; using defaults"),
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::CheckConfig => {
            println!(
                "configuration ok: port={} heartbeat_ms={} interval_ms={}",
                config.adapter.port,
                config.adapter.heartbeat_millis(),
                config.simulator.interval.as_millis()
            );
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        config.adapter.port = port;
    }
    if let Some(ms) = cli.heartbeat_ms {
        config.adapter.heartbeat = Duration::from_millis(ms);
    }
    if cli.verbose {
        config.adapter.verbose = true;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    if let Some(ms) = cli.interval_ms {
        config.simulator.interval = Duration::from_millis(ms);
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let adapter = Adapter::new(config.adapter.clone());
    let mut machine = SimulatedMachine::install(&adapter, &config.simulator)?;

    let device_uuid = config
        .simulator
        .device_uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    adapter
        .send_command(DeviceCommand::Uuid, &device_uuid, true)
        .await;
    adapter
        .send_command(DeviceCommand::Manufacturer, &config.simulator.manufacturer, true)
        .await;
    adapter.add_asset(Arc::new(sample_tool()), true).await?;

    let addr = adapter.start().await?;
    info!(address = %addr, uuid = %device_uuid, "daemon running; waiting for termination signal");

    let mut ticker = tokio::time::interval(config.simulator.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                adapter.begin();
                machine.step();
                adapter.send_changed(None).await;
            }
            result = signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("ctrl-c received; shutting down");
                break;
            }
        }
    }

    adapter.unavailable();
    adapter.send_changed(None).await;
    adapter.stop().await;
    Ok(())
}

//! WolfMaster - Device Mastership Reconciliation
//!
//! Operator binary: configuration management and an in-process cluster
//! simulation of the reconciliation engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfmaster::config::WolfMasterConfig;
use wolfmaster::device::DeviceId;
use wolfmaster::error::{Error, Result};
use wolfmaster::simulation::{Cluster, ClusterView, RecordedEvent, SIMULATED_SCHEME};

/// WolfMaster - Device Mastership Reconciliation
#[derive(Parser)]
#[command(name = "wolfmaster")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfmaster.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfmaster.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,

    /// Run an in-process cluster, fail every device over once and print
    /// the resulting roles as JSON
    Simulate {
        /// Number of cluster nodes
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// Number of simulated devices
        #[arg(short, long, default_value_t = 4)]
        devices: u32,

        /// How long to wait for the cluster to settle after each step
        #[arg(long, default_value_t = 10)]
        settle_secs: u64,
    },
}

/// Output of the `simulate` command
#[derive(Serialize)]
struct SimulationReport {
    before_failover: ClusterView,
    after_failover: ClusterView,
    events: Vec<RecordedEvent>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Output format comes from the config file when there is one
    let format = WolfMasterConfig::from_file(&cli.config)
        .map(|config| config.logging.format)
        .unwrap_or_else(|_| "pretty".to_string());
    init_logging(&cli.log_level, &format);

    match cli.command {
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Simulate {
            nodes,
            devices,
            settle_secs,
        } => run_simulate(cli.config, nodes, devices, Duration::from_secs(settle_secs)).await,
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        "compact" => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

/// Write a default configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfMaster Configuration
# Generated configuration file

[node]
id = "{node_id}"

[mastership]
# Delay between two audit passes over all devices
audit_interval_secs = 60
# Devices checked at once during an audit pass
audit_concurrency = 16
# Upper bound on a single device check
device_check_timeout_ms = 5000

[events]
buffer_size = 1024

[logging]
level = "info"
format = "pretty"
"#);

    // Never write something we could not load back
    WolfMasterConfig::from_str(&config_content)?;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then try: wolfmaster --config {} simulate", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfMasterConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Audit Interval: {} s", config.mastership.audit_interval_secs);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfMasterConfig::from_file(&config_path)?;

    println!("WolfMaster Node Information");
    println!("===========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!();
    println!("Mastership Configuration:");
    println!("  Audit Interval: {} s", config.mastership.audit_interval_secs);
    println!("  Concurrency:    {}", config.mastership.audit_concurrency);
    println!("  Check Timeout:  {} ms", config.mastership.device_check_timeout_ms);
    println!();
    println!("Events:");
    println!("  Buffer Size:    {}", config.events.buffer_size);
    println!();
    println!("Logging:");
    println!("  Level:          {}", config.logging.level);
    println!("  Format:         {}", config.logging.format);

    Ok(())
}

/// Load the config file if present, defaults otherwise
fn load_or_default(config_path: &Path) -> Result<WolfMasterConfig> {
    if config_path.exists() {
        WolfMasterConfig::from_file(config_path)
    } else {
        tracing::info!("No configuration at {:?}, using defaults", config_path);
        Ok(WolfMasterConfig::for_node("node"))
    }
}

/// Run the in-process cluster simulation
async fn run_simulate(
    config_path: PathBuf,
    nodes: usize,
    devices: u32,
    settle: Duration,
) -> Result<()> {
    let template = load_or_default(&config_path)?;
    tracing::info!("Starting simulation: {} node(s), {} device(s)", nodes, devices);

    let cluster = Cluster::start(&template, nodes).await?;

    let scenario = async {
        for n in 1..=devices {
            let device = DeviceId::new(format!("{}:{:016x}", SIMULATED_SCHEME, n));
            cluster.connect(&device).await?;
        }
        if !cluster.wait_for_convergence(settle).await {
            tracing::warn!("Cluster did not settle within {:?} after connecting", settle);
        }
        let before = cluster.view().await;

        for device in cluster.devices().await {
            if let Some(master) = cluster.master_of(&device).await {
                tracing::info!("Disconnecting {} from its master {}", device, master);
                cluster.disconnect(&master, &device).await?;
            }
        }
        if !cluster.wait_for_convergence(settle).await {
            tracing::warn!("Cluster did not settle within {:?} after failover", settle);
        }
        Ok::<_, Error>(before)
    };

    let before = tokio::select! {
        result = scenario => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            None
        }
    };

    let after = cluster.view().await;
    cluster.shutdown().await;

    if let Some(before) = before {
        let report = SimulationReport {
            before_failover: before?,
            after_failover: after,
            events: cluster.events().await,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the generator monitor daemon
use anyhow::Result;
use clap::Parser;
use log::{error, info};
use rust_genset_monitor::config::{output_config_schema, Config};
use rust_genset_monitor::daemon::Daemon;
use std::path::PathBuf;
use std::time::Duration;

/// Diesel generator telemetry and powertrain anomaly monitor
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML). A default one is written if missing.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Controller or serial gateway address
    #[arg(long, env = "MODBUS_HOST")]
    modbus_host: Option<String>,

    /// Controller TCP port
    #[arg(long, env = "MODBUS_PORT")]
    modbus_port: Option<u16>,

    /// Modbus unit identifier
    #[arg(long, env = "MODBUS_UNIT_ID")]
    unit_id: Option<u8>,

    /// InfluxDB base URL
    #[arg(long, env = "INFLUXDB_URL")]
    influx_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    influx_token: Option<String>,

    /// InfluxDB organisation
    #[arg(long, env = "INFLUXDB_ORG")]
    influx_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long, env = "INFLUXDB_BUCKET")]
    influx_bucket: Option<String>,

    /// Remote analysis gateway URL
    #[arg(long, env = "GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Remote analysis gateway API key
    #[arg(long, env = "GATEWAY_API_KEY", hide_env_values = true)]
    gateway_api_key: Option<String>,

    /// Initial state of the remote analysis switch
    #[arg(long, env = "AI_ENABLED")]
    ai_enabled: Option<bool>,

    /// Backend receiving agent heartbeats
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<String>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn init_logging(args: &Args) {
    let default_level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, default_level),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.show_config_schema {
        return output_config_schema();
    }

    init_logging(&args);

    let mut config = Config::from_file(&args.config)?;
    config.apply_args(
        args.modbus_host,
        args.modbus_port,
        args.unit_id,
        args.influx_url,
        args.influx_token,
        args.influx_org,
        args.influx_bucket,
        args.gateway_url,
        args.gateway_api_key,
        args.ai_enabled,
        args.backend_url,
    );

    info!(
        "Generator monitor {} starting, controller at {}",
        env!("CARGO_PKG_VERSION"),
        config.modbus.socket_address()
    );

    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    // Stop on Ctrl+C, or when a task cleared the running flag on its own
    let running = daemon.running();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Unable to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
        _ = async {
            while running.load(std::sync::atomic::Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        } => {
            error!("A daemon task stopped unexpectedly");
        }
    }

    daemon.shutdown();
    daemon.join().await
}

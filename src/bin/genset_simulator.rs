// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use clap::Parser;
use log::info;
use rust_genset_monitor::config::Config;
use rust_genset_monitor::modbus::{run_simulator, RegisterImage};
use std::path::PathBuf;
use tokio::net::TcpListener;

/// Modbus TCP server simulating a generator controller at half load
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file providing the register map
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Listen port
    #[clap(long, default_value = "5020")]
    port: u16,

    /// Report the engine as stopped
    #[clap(long)]
    stopped: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let image = RegisterImage::running_engine(&config.registers, &config.events);
    if args.stopped {
        if let Some(speed) = config
            .registers
            .iter()
            .find(|r| r.name == config.modbus.engine_speed_register)
        {
            image.set_address(speed.address, 0);
        }
    }

    let listener = TcpListener::bind((args.address.as_str(), args.port)).await?;
    info!(
        "Simulating {} registers, engine {}",
        config.registers.len(),
        if args.stopped { "stopped" } else { "running" }
    );

    tokio::select! {
        result = run_simulator(listener, image) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Simulator stopped");
            Ok(())
        }
    }
}

// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use clap::Parser;
use rust_genset_monitor::catalog::RegisterCatalog;
use rust_genset_monitor::config::Config;
use rust_genset_monitor::decoder::{DecodeOutcome, RawReading, RegisterDecoder};
use rust_genset_monitor::modbus::{ConnectionManager, ConnectionSettings, TcpConnector, TokioSleeper};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Read every catalog register from a generator controller once and print it decoded
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file providing the register map
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Controller address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Controller port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Modbus unit identifier
    #[clap(long, default_value = "1")]
    unit_id: u8,

    /// Also print raw register words
    #[clap(long)]
    raw: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.modbus.host = args.address.clone();
    config.modbus.port = args.port;
    config.modbus.unit_id = args.unit_id;
    config.modbus.max_connect_attempts = Some(1);

    let catalog = RegisterCatalog::from_config(&config)?;
    let decoder = RegisterDecoder::new(config.anomaly_thresholds.clone());

    println!("Connecting to controller at {}", config.modbus.socket_address());
    let mut conn = ConnectionManager::new(
        Arc::new(TcpConnector::from_config(&config.modbus)),
        Arc::new(TokioSleeper::new()),
        ConnectionSettings::from_config(&config.modbus, &catalog),
    );
    let identity = conn.connect(&AtomicBool::new(true)).await?;
    println!("ECM model: {}", identity);
    println!();

    for def in catalog.iter() {
        let raw = match conn.read_register_retrying(def.offset(), 1).await {
            Ok(words) => match words.first() {
                Some(word) => *word,
                None => {
                    println!("{:<40} <empty response>", def.name);
                    continue;
                }
            },
            Err(e) => {
                println!("{:<40} <read failed: {}>", def.name, e);
                continue;
            }
        };

        let raw_text = if args.raw {
            format!(" [raw 0x{:04X}]", raw)
        } else {
            String::new()
        };
        match decoder.decode(&RawReading::new(def.name.clone(), raw), def) {
            DecodeOutcome::Reading(reading) => {
                let mut line = format!("{:<40} {:>12.2} {}", def.name, reading.value, reading.units);
                if let Some(text) = &reading.text {
                    line.push_str(&format!(" ({})", text));
                }
                if let Some(correction) = reading.correction {
                    line.push_str(&format!(" <{:?}>", correction));
                }
                println!("{}{}", line, raw_text);
            }
            DecodeOutcome::SkipWrite { .. } => {
                println!("{:<40} <not supported by controller>{}", def.name, raw_text);
            }
        }
    }

    conn.disconnect().await;
    Ok(())
}

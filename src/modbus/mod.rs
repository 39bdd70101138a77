// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module owns the link to the generator controller. The monitor acts as
//! a Modbus client: it reads holding registers from the controller (directly
//! over Modbus TCP, or through a serial gateway forwarding RTU frames).
//!
//! ## Key Components
//!
//! - [`ConnectionManager`]: connection state machine with canary validation,
//!   capped exponential backoff, per-register retries and health checks.
//! - [`RegisterBus`] / [`BusConnector`]: the register-oriented bus seam, with
//!   the tokio-modbus [`TcpConnector`] as production implementation.
//! - [`SimulatedController`] and [`GeneratorSimulatorServer`]: a simulated
//!   controller for tests and bench work.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//! use rust_genset_monitor::catalog::RegisterCatalog;
//! use rust_genset_monitor::config::Config;
//! use rust_genset_monitor::modbus::{ConnectionManager, ConnectionSettings, TcpConnector, TokioSleeper};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let catalog = RegisterCatalog::from_config(&config)?;
//! let mut conn = ConnectionManager::new(
//!     Arc::new(TcpConnector::from_config(&config.modbus)),
//!     Arc::new(TokioSleeper::new()),
//!     ConnectionSettings::from_config(&config.modbus, &catalog),
//! );
//! let identity = conn.connect(&AtomicBool::new(true)).await?;
//! println!("ECM model {}", identity);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod bus;
pub mod connection;
pub mod simulator;

pub use backoff::{BackoffPolicy, RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
pub use bus::{BusConnector, RegisterBus, TcpConnector};
pub use connection::{
    ConnectionEvent, ConnectionListener, ConnectionManager, ConnectionSettings, ConnectionState,
};
pub use simulator::{run_simulator, GeneratorSimulatorServer, RegisterImage, SimulatedController};

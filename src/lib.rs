// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust genset monitor library
//!
//! Reads a diesel generator controller over Modbus, stores corrected
//! readings and active events in a time-series store, and runs a
//! load-banded anomaly analysis on top of the stored history.
//!
//! - [`modbus`], [`catalog`], [`decoder`], [`events`], [`poller`]: acquisition
//! - [`store`]: time-series persistence
//! - [`load_band`], [`baseline`], [`analysis`], [`agent`]: analysis
//! - [`config`], [`daemon`]: configuration and task wiring

pub mod agent;
pub mod analysis;
pub mod baseline;
pub mod catalog;
pub mod config;
pub mod daemon;
pub mod decoder;
pub mod error;
pub mod events;
pub mod load_band;
pub mod modbus;
pub mod poller;
pub mod store;

pub use error::{TelemetryError, TelemetryResult};

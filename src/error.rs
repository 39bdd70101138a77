// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error types shared by the telemetry core
//!
//! Only genuine failures live here. A controller-reported "unsupported register"
//! flag or an anomaly clamp are regular decode outcomes, see
//! [`crate::decoder::DecodeOutcome`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Transport fault or timeout on the device bus
    #[error("Bus error on {target}: {message}")]
    Bus { target: String, message: String },

    /// The device answered but the payload cannot be used
    #[error("Decode error at register offset {offset}: {message}")]
    Decode { offset: u16, message: String },

    /// A read was attempted without an open link
    #[error("Not connected to the device")]
    NotConnected,

    #[error("Failed to write point to measurement {measurement}: {message}")]
    StoreWrite {
        measurement: String,
        message: String,
    },

    #[error("Failed to query measurement {measurement}: {message}")]
    StoreQuery {
        measurement: String,
        message: String,
    },

    #[error("Analysis gateway error: {0}")]
    Gateway(String),

    #[error("Analysis gateway did not answer within {seconds}s")]
    GatewayTimeout { seconds: u64 },

    #[error("Heartbeat delivery failed: {0}")]
    Heartbeat(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Shutdown was requested while waiting
    #[error("Shutdown requested")]
    Shutdown,
}

impl TelemetryError {
    pub fn bus(target: impl Into<String>, message: impl ToString) -> Self {
        TelemetryError::Bus {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(offset: u16, message: impl ToString) -> Self {
        TelemetryError::Decode {
            offset,
            message: message.to_string(),
        }
    }

    /// Faults that count toward demoting the connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, TelemetryError::Bus { .. } | TelemetryError::NotConnected)
    }
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register-oriented view of the device bus
//!
//! [`RegisterBus`] is an open link able to read holding registers and
//! [`BusConnector`] knows how to open one. The production implementation
//! speaks Modbus through tokio-modbus, either native TCP framing or RTU frames
//! tunnelled through a serial-to-Ethernet gateway.

use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::net::TcpStream;
use tokio_modbus::client::{rtu, tcp, Context};
use tokio_modbus::prelude::*;

use crate::config::{Framing, ModbusConfig};
use crate::error::{TelemetryError, TelemetryResult};

/// An open link to the controller.
#[async_trait]
pub trait RegisterBus: Send + Debug {
    /// Read `count` holding registers starting at the 0-based `offset`.
    ///
    /// Transport faults and timeouts fail with [`TelemetryError::Bus`];
    /// exception responses and short payloads with [`TelemetryError::Decode`].
    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> TelemetryResult<Vec<u16>>;

    /// Release the link. Errors are not reported.
    async fn close(&mut self) {}
}

/// Factory for [`RegisterBus`] links.
#[async_trait]
pub trait BusConnector: Send + Sync + Debug {
    async fn open(&self) -> TelemetryResult<Box<dyn RegisterBus>>;

    /// Human readable target, used in logs
    fn describe(&self) -> String;
}

/// Opens Modbus links over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    unit_id: u8,
    framing: Framing,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            framing: Framing::Tcp,
            timeout: Duration::from_secs(1),
        }
    }

    pub fn from_config(config: &ModbusConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.unit_id)
            .with_framing(config.framing)
            .with_timeout(config.timeout())
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn resolve(&self) -> TelemetryResult<SocketAddr> {
        let target = format!("{}:{}", self.host, self.port);
        let mut addrs = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| TelemetryError::bus(&target, format!("cannot resolve: {}", e)))?;
        addrs
            .next()
            .ok_or_else(|| TelemetryError::bus(&target, "no address found"))
    }
}

#[async_trait]
impl BusConnector for TcpConnector {
    async fn open(&self) -> TelemetryResult<Box<dyn RegisterBus>> {
        let target = self.describe();
        let socket_addr = self.resolve().await?;
        let slave = Slave(self.unit_id);

        let ctx = match self.framing {
            Framing::Tcp => tokio::time::timeout(self.timeout, tcp::connect_slave(socket_addr, slave))
                .await
                .map_err(|_| TelemetryError::bus(&target, "connect timed out"))?
                .map_err(|e| TelemetryError::bus(&target, e))?,
            Framing::RtuOverTcp => {
                let stream = tokio::time::timeout(self.timeout, TcpStream::connect(socket_addr))
                    .await
                    .map_err(|_| TelemetryError::bus(&target, "connect timed out"))?
                    .map_err(|e| TelemetryError::bus(&target, e))?;
                rtu::attach_slave(stream, slave)
            }
        };
        debug!("Transport open to {} ({:?} framing)", target, self.framing);

        Ok(Box::new(TcpBus {
            ctx,
            target,
            timeout: self.timeout,
        }))
    }

    fn describe(&self) -> String {
        format!("{}:{} unit {}", self.host, self.port, self.unit_id)
    }
}

#[derive(Debug)]
struct TcpBus {
    ctx: Context,
    target: String,
    timeout: Duration,
}

#[async_trait]
impl RegisterBus for TcpBus {
    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> TelemetryResult<Vec<u16>> {
        let response = tokio::time::timeout(self.timeout, self.ctx.read_holding_registers(offset, count))
            .await
            .map_err(|_| {
                TelemetryError::bus(
                    &self.target,
                    format!("read of {} register(s) at offset {} timed out", count, offset),
                )
            })?
            .map_err(|e| TelemetryError::bus(&self.target, e))?;

        let words = response
            .map_err(|code| TelemetryError::decode(offset, format!("exception response: {:?}", code)))?;
        if words.len() != usize::from(count) {
            return Err(TelemetryError::decode(
                offset,
                format!("expected {} word(s), got {}", count, words.len()),
            ));
        }
        Ok(words)
    }

    async fn close(&mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            debug!("Error while closing link to {}: {}", self.target, e);
        }
    }
}

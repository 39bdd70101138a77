// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated generator controller
//!
//! Two front-ends share the same [`RegisterImage`]:
//!
//! - [`SimulatedController`], an in-process [`BusConnector`] with fault
//!   injection, used to exercise the connection state machine and the poller
//!   without any socket.
//! - [`GeneratorSimulatorServer`], a tokio-modbus TCP server answering holding
//!   register requests, used for end-to-end tests and bench work.
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module
//! uses the terms "server" and "client": the simulator is the server.

use std::collections::{HashMap, HashSet};
use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use super::bus::{BusConnector, RegisterBus};
use crate::config::{EventsConfig, RegisterConfig};
use crate::error::{TelemetryError, TelemetryResult};

/// Holding register contents keyed by 0-based offset.
#[derive(Debug, Clone, Default)]
pub struct RegisterImage {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl RegisterImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, offset: u16, value: u16) {
        if let Ok(mut registers) = self.registers.lock() {
            registers.insert(offset, value);
        }
    }

    /// Set a register by its 1-based documented address.
    pub fn set_address(&self, address: u16, value: u16) {
        self.set(address.saturating_sub(1), value);
    }

    pub fn get(&self, offset: u16) -> Option<u16> {
        self.registers
            .lock()
            .ok()
            .and_then(|registers| registers.get(&offset).copied())
    }

    /// Read a contiguous block, failing on the first unmapped offset.
    pub fn read(&self, offset: u16, count: u16) -> Result<Vec<u16>, ExceptionCode> {
        let registers = self
            .registers
            .lock()
            .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        (0..count)
            .map(|i| {
                offset
                    .checked_add(i)
                    .and_then(|address| registers.get(&address).copied())
                    .ok_or(ExceptionCode::IllegalDataAddress)
            })
            .collect()
    }

    pub fn write(&self, offset: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        let mut registers = self
            .registers
            .lock()
            .map_err(|_| ExceptionCode::ServerDeviceFailure)?;
        for (i, value) in values.iter().enumerate() {
            let address = offset
                .checked_add(i as u16)
                .ok_or(ExceptionCode::IllegalDataAddress)?;
            match registers.get_mut(&address) {
                Some(register) => *register = *value,
                None => return Err(ExceptionCode::IllegalDataAddress),
            }
        }
        Ok(())
    }

    /// Load an active event table: count register followed by 4-word slots.
    pub fn set_events(&self, base_address: u16, events: &[[u16; 4]], slots: u16) {
        self.set_address(base_address, events.len() as u16);
        for slot in 0..slots {
            let start = base_address + 1 + slot * 4;
            let words = events.get(usize::from(slot)).copied().unwrap_or([0; 4]);
            for (i, word) in words.iter().enumerate() {
                self.set_address(start + i as u16, *word);
            }
        }
    }

    /// Image of a controller driving a generator at roughly half load.
    pub fn running_engine(registers: &[RegisterConfig], events: &EventsConfig) -> Self {
        let image = Self::new();
        for register in registers {
            let raw = match register.name.as_str() {
                "ECM Model" => 3500,
                "Engine Speed" => 1800,
                "Engine Oil Pressure" => 4125,
                "Engine Coolant Temperature" => 852,
                "Engine Fuel Pressure" => 3010,
                "Engine Fuel Temperature" => 410,
                "Engine Fuel Rate" => 215,
                "Intake Air Temperature" => 355,
                "Intake Air Pressure" => 1650,
                "Battery Voltage" => 276,
                "Controller Temperature" => 420,
                "Generator Frequency" => 600,
                "Generator Average Line-Line Voltage" => 480,
                "Generator Average Current" => 110,
                "Generator Total Real Power" => 75,
                "Generator Total Reactive Power" => 12,
                "Generator Apparent Power" => 0xFFC0,
                "Generator Power Factor Average" => 95,
                "Generator Load % of Rated" => 500,
                "Genset kW Rating" => 150,
                "Generator State" => 3,
                "Total Runtime Hours" => 1234,
                "Total Number of Starts" => 311,
                "Total Runtime kW Hours" => 0xFFFF,
                _ => 0,
            };
            image.set_address(register.address, raw);
        }
        if events.enabled {
            // Low oil pressure warning: level 2, FMI 18, SPN 100
            image.set_events(events.base_address, &[[(2 << 8) | 18, 1, 7, 100]], events.max_events);
        }
        image
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    refuse_opens: u32,
    fail_reads: HashMap<u16, u32>,
    dead_offsets: HashSet<u16>,
    link_down: bool,
}

/// In-process controller with fault injection.
#[derive(Debug, Clone, Default)]
pub struct SimulatedController {
    image: RegisterImage,
    faults: Arc<Mutex<FaultPlan>>,
    opens: Arc<AtomicU32>,
}

impl SimulatedController {
    pub fn new(image: RegisterImage) -> Self {
        Self {
            image,
            faults: Arc::default(),
            opens: Arc::default(),
        }
    }

    pub fn image(&self) -> &RegisterImage {
        &self.image
    }

    fn with_faults(&self, change: impl FnOnce(&mut FaultPlan)) {
        if let Ok(mut faults) = self.faults.lock() {
            change(&mut faults);
        }
    }

    /// Refuse the next `count` transport opens.
    pub fn refuse_opens(&self, count: u32) {
        self.with_faults(|f| f.refuse_opens = count);
    }

    /// Fail the next `count` reads touching `offset` with a transport error.
    pub fn fail_reads(&self, offset: u16, count: u32) {
        self.with_faults(|f| {
            f.fail_reads.insert(offset, count);
        });
    }

    /// Every read touching `offset` fails with a transport error.
    pub fn kill_offset(&self, offset: u16) {
        self.with_faults(|f| {
            f.dead_offsets.insert(offset);
        });
    }

    /// Every read fails with a transport error until the link is restored.
    pub fn set_link_down(&self, down: bool) {
        self.with_faults(|f| f.link_down = down);
    }

    /// Transport opens that succeeded.
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusConnector for SimulatedController {
    async fn open(&self) -> TelemetryResult<Box<dyn RegisterBus>> {
        let refused = self
            .faults
            .lock()
            .map(|mut faults| {
                if faults.refuse_opens > 0 {
                    faults.refuse_opens -= 1;
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if refused {
            return Err(TelemetryError::bus(self.describe(), "connection refused"));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedBus {
            image: self.image.clone(),
            faults: self.faults.clone(),
        }))
    }

    fn describe(&self) -> String {
        "simulated controller".to_string()
    }
}

#[derive(Debug)]
struct SimulatedBus {
    image: RegisterImage,
    faults: Arc<Mutex<FaultPlan>>,
}

#[async_trait]
impl RegisterBus for SimulatedBus {
    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> TelemetryResult<Vec<u16>> {
        let span = offset..offset.saturating_add(count);
        let transport_fault = self
            .faults
            .lock()
            .map(|mut faults| {
                if faults.link_down || span.clone().any(|o| faults.dead_offsets.contains(&o)) {
                    return true;
                }
                for o in span.clone() {
                    if let Some(remaining) = faults.fail_reads.get_mut(&o) {
                        if *remaining > 0 {
                            *remaining -= 1;
                            return true;
                        }
                    }
                }
                false
            })
            .unwrap_or(true);
        if transport_fault {
            return Err(TelemetryError::bus("simulated controller", "no response"));
        }

        self.image
            .read(offset, count)
            .map_err(|code| TelemetryError::decode(offset, format!("exception response: {:?}", code)))
    }
}

/// tokio-modbus service exposing a [`RegisterImage`] as holding registers.
#[derive(Debug, Clone)]
pub struct GeneratorSimulatorServer {
    holding_registers: RegisterImage,
}

impl GeneratorSimulatorServer {
    pub fn new(holding_registers: RegisterImage) -> Self {
        Self { holding_registers }
    }
}

impl tokio_modbus::server::Service for GeneratorSimulatorServer {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .holding_registers
                .read(addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::WriteMultipleRegisters(addr, values) => self
                .holding_registers
                .write(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::WriteSingleRegister(addr, value) => self
                .holding_registers
                .write(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            _ => {
                error!("SIMULATOR: Exception::IllegalFunction - Unimplemented function code in request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

/// Serve `image` on `listener` until the task is dropped or the listener fails.
pub async fn run_simulator(listener: TcpListener, image: RegisterImage) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("Generator simulator listening on {}", local_addr);

    let server = Server::new(listener);
    let new_service = move |_socket_addr: SocketAddr| -> std::io::Result<Option<GeneratorSimulatorServer>> {
        Ok(Some(GeneratorSimulatorServer::new(image.clone())))
    };
    let on_connected = move |stream: tokio::net::TcpStream, socket_addr: SocketAddr| {
        debug!("Simulator client connected from {}", socket_addr);
        let new_service = new_service.clone();
        async move { accept_tcp_connection(stream, socket_addr, new_service) }
    };
    let on_process_error = |err: std::io::Error| {
        error!("Simulator error: {}", err);
    };

    server.serve(&on_connected, on_process_error).await?;
    Ok(())
}

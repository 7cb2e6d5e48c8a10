//! Instance manager: plans addresses for N drones, starts them all or none,
//! and stops them together.

use log::info;
use std::net::{IpAddr, Ipv4Addr};

use crate::broadcaster::TelemetryTarget;
use crate::config::SimConfig;
use crate::error::SimError;
use crate::instance::{BoundInstance, DroneInstance, InstanceSpec};
use crate::state::{DroneSnapshot, SharedState};

pub const DEFAULT_COMMAND_PORT: u16 = 8889;
pub const DEFAULT_TELEMETRY_PORT: u16 = 8890;

/// How instance `i` is offset from the base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressingMode {
    /// Same IP; both ports advance by `port_step` per instance.
    #[default]
    SequentialPorts,
    /// Same ports; the IP advances by one per instance.
    SequentialIps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetLayout {
    pub base_ip: IpAddr,
    pub command_port: u16,
    pub telemetry_port: u16,
    pub count: usize,
    pub mode: AddressingMode,
    pub port_step: u16,
}

impl Default for FleetLayout {
    fn default() -> Self {
        Self {
            base_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            command_port: DEFAULT_COMMAND_PORT,
            telemetry_port: DEFAULT_TELEMETRY_PORT,
            count: 1,
            mode: AddressingMode::default(),
            port_step: 2,
        }
    }
}

impl FleetLayout {
    /// Addresses for every instance. Port 0 stays 0 (OS-assigned) for all of them.
    pub fn plan(&self) -> Result<Vec<InstanceSpec>, SimError> {
        if self.count == 0 {
            return Err(SimError::EmptyFleet);
        }
        (0..self.count)
            .map(|index| {
                let (ip, command_port, telemetry_port) = match self.mode {
                    AddressingMode::SequentialPorts => (
                        self.base_ip,
                        offset_port(self.command_port, index, self.port_step)
                            .ok_or(SimError::PortOverflow { index })?,
                        offset_port(self.telemetry_port, index, self.port_step)
                            .ok_or(SimError::PortOverflow { index })?,
                    ),
                    AddressingMode::SequentialIps => (
                        offset_ip(self.base_ip, index).ok_or(SimError::AddressOverflow { index })?,
                        self.command_port,
                        self.telemetry_port,
                    ),
                };
                Ok(InstanceSpec {
                    index,
                    name: format!("drone-{index}"),
                    ip,
                    command_port,
                    telemetry_port,
                })
            })
            .collect()
    }
}

fn offset_port(base: u16, index: usize, step: u16) -> Option<u16> {
    if base == 0 {
        return Some(0);
    }
    let offset = index.checked_mul(step as usize)?;
    u16::try_from((base as usize).checked_add(offset)?).ok()
}

fn offset_ip(base: IpAddr, index: usize) -> Option<IpAddr> {
    match base {
        IpAddr::V4(ip) => {
            let next = u32::from(ip).checked_add(u32::try_from(index).ok()?)?;
            Some(IpAddr::V4(next.into()))
        }
        IpAddr::V6(ip) => {
            let next = u128::from(ip).checked_add(index as u128)?;
            Some(IpAddr::V6(next.into()))
        }
    }
}

/// A running fleet of isolated drone instances.
pub struct InstanceManager {
    instances: Vec<DroneInstance>,
}

impl InstanceManager {
    /// Bind every socket of every instance, then start them.
    ///
    /// Any failure releases whatever was already bound or started.
    pub fn start(
        layout: &FleetLayout,
        config: &SimConfig,
        target: TelemetryTarget,
    ) -> Result<Self, SimError> {
        let specs = layout.plan()?;

        let mut bound = Vec::with_capacity(specs.len());
        for spec in specs {
            bound.push(BoundInstance::bind(spec)?);
        }

        let mut instances = Vec::with_capacity(bound.len());
        for instance in bound {
            instances.push(instance.start(config, target)?);
        }

        info!("{} simulated drone(s) running", instances.len());
        Ok(Self { instances })
    }

    pub fn instances(&self) -> &[DroneInstance] {
        &self.instances
    }

    pub fn snapshots(&self) -> Vec<DroneSnapshot> {
        self.instances.iter().map(DroneInstance::snapshot).collect()
    }

    pub fn state_handles(&self) -> Vec<SharedState> {
        self.instances.iter().map(DroneInstance::state_handle).collect()
    }

    /// Stop every instance and release every socket.
    pub fn shutdown(mut self) {
        self.stop_all();
    }

    fn stop_all(&mut self) {
        // Flag everyone first so the ticker waits overlap.
        for instance in &self.instances {
            instance.request_stop();
        }
        for instance in &mut self.instances {
            instance.shutdown();
        }
    }
}

impl Drop for InstanceManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}

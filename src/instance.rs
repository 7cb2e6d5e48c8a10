//! One simulated drone: its sockets, its state, and the two threads serving them.
//!
//! - listener thread: blocking receive on the command socket
//! - ticker thread: integrator step every tick, telemetry on the broadcast slot
//!
//! Both threads share only this instance's [`SharedState`].

use log::{debug, info, warn};
use rand::Rng;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::broadcaster::{TelemetryBroadcaster, TelemetryTarget};
use crate::config::SimConfig;
use crate::error::SimError;
use crate::integrator::{self, FlightModel};
use crate::interpreter::Interpreter;
use crate::listener::CommandListener;
use crate::state::{lock, DroneSnapshot, DroneState, Identity, SharedState};
use crate::telemetry::TelemetryFrame;

const SERIAL_PREFIX: &str = "0TQ";
const SERIAL_LEN: usize = 14;
const SERIAL_CHARSET: &[u8] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Where one instance should listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub index: usize,
    pub name: String,
    pub ip: IpAddr,
    pub command_port: u16,
    pub telemetry_port: u16,
}

impl InstanceSpec {
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.command_port)
    }

    pub fn telemetry_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.telemetry_port)
    }
}

/// An instance whose sockets are bound but whose threads are not running yet.
///
/// Dropping it releases both ports.
#[derive(Debug)]
pub struct BoundInstance {
    spec: InstanceSpec,
    command_socket: UdpSocket,
    telemetry_socket: UdpSocket,
}

impl BoundInstance {
    pub fn bind(spec: InstanceSpec) -> Result<Self, SimError> {
        let command_socket = bind_socket(&spec, "command", spec.command_addr())?;
        let telemetry_socket = bind_socket(&spec, "telemetry", spec.telemetry_addr())?;
        Ok(Self {
            spec,
            command_socket,
            telemetry_socket,
        })
    }

    /// Spawn the listener and ticker threads.
    pub fn start(
        self,
        config: &SimConfig,
        target: TelemetryTarget,
    ) -> Result<DroneInstance, SimError> {
        let command_addr = self.command_socket.local_addr()?;
        let telemetry_addr = self.telemetry_socket.local_addr()?;
        let identity = Identity {
            index: self.spec.index,
            name: self.spec.name.clone(),
            ip: self.spec.ip,
            command_port: command_addr.port(),
            telemetry_port: telemetry_addr.port(),
            serial: random_serial(),
        };

        let state: SharedState = Arc::new(Mutex::new(DroneState::new(identity.clone(), config)));
        let stop = Arc::new(AtomicBool::new(false));

        let listener = CommandListener::new(
            identity.name.clone(),
            self.command_socket,
            Arc::clone(&state),
            Interpreter::new(config),
            Arc::clone(&stop),
        );
        let listener = thread::Builder::new()
            .name(format!("{}-cmd", identity.name))
            .spawn(move || listener.run())?;

        let ticker = Ticker {
            name: identity.name.clone(),
            state: Arc::clone(&state),
            broadcaster: TelemetryBroadcaster::new(self.telemetry_socket, target, config),
            model: FlightModel::from_config(config),
            tick: config.tick_interval(),
            stop: Arc::clone(&stop),
        };
        let ticker = match thread::Builder::new()
            .name(format!("{}-tick", identity.name))
            .spawn(move || ticker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::Release);
                if wake(command_addr) {
                    let _ = listener.join();
                }
                return Err(e.into());
            }
        };

        info!(
            "[{}] listening on {} (telemetry from {}, sn {})",
            identity.name, command_addr, telemetry_addr, identity.serial
        );

        Ok(DroneInstance {
            identity,
            command_addr,
            telemetry_addr,
            state,
            stop,
            listener: Some(listener),
            ticker: Some(ticker),
        })
    }
}

fn bind_socket(spec: &InstanceSpec, role: &'static str, addr: SocketAddr) -> Result<UdpSocket, SimError> {
    UdpSocket::bind(addr).map_err(|source| SimError::Bind {
        instance: spec.name.clone(),
        role,
        addr,
        source,
    })
}

fn random_serial() -> String {
    let mut rng = rand::thread_rng();
    let tail: String = (SERIAL_PREFIX.len()..SERIAL_LEN)
        .map(|_| SERIAL_CHARSET[rng.gen_range(0..SERIAL_CHARSET.len())] as char)
        .collect();
    format!("{SERIAL_PREFIX}{tail}")
}

struct Ticker {
    name: String,
    state: SharedState,
    broadcaster: TelemetryBroadcaster,
    model: FlightModel,
    tick: Duration,
    stop: Arc<AtomicBool>,
}

impl Ticker {
    fn run(mut self) {
        let mut last = Instant::now();
        while !self.stop.load(Ordering::Acquire) {
            thread::sleep(self.tick);
            let now = Instant::now();
            let dt = now.duration_since(last);
            last = now;

            // Build the frame under the lock, send after releasing it.
            let outgoing = {
                let mut state = lock(&self.state);
                integrator::advance(&mut state, dt, &self.model);
                match state.peer() {
                    Some(peer) if self.broadcaster.is_due(now) => {
                        Some((TelemetryFrame::from_state(&state), peer))
                    }
                    _ => None,
                }
            };
            if let Some((frame, peer)) = outgoing {
                self.broadcaster.broadcast(now, frame, peer);
            }
        }
        debug!(
            "[{}] ticker stopped after {} telemetry frames",
            self.name,
            self.broadcaster.sent()
        );
    }
}

/// A running simulated drone.
pub struct DroneInstance {
    identity: Identity,
    command_addr: SocketAddr,
    telemetry_addr: SocketAddr,
    state: SharedState,
    stop: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl DroneInstance {
    /// Bind and start in one step.
    pub fn spawn(
        spec: InstanceSpec,
        config: &SimConfig,
        target: TelemetryTarget,
    ) -> Result<Self, SimError> {
        BoundInstance::bind(spec)?.start(config, target)
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Actual bound command address (resolves port 0).
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn telemetry_addr(&self) -> SocketAddr {
        self.telemetry_addr
    }

    pub fn snapshot(&self) -> DroneSnapshot {
        lock(&self.state).snapshot()
    }

    /// Another handle on the live state, for observers such as the mirror.
    pub fn state_handle(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Read the live state under the instance lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&DroneState) -> R) -> R {
        f(&lock(&self.state))
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some() || self.ticker.is_some()
    }

    /// Raise the stop flag without waiting; [`DroneInstance::shutdown`] finishes the job.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop both threads and release both sockets. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.is_running() {
            return;
        }
        self.request_stop();

        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                warn!("[{}] ticker thread panicked", self.identity.name);
            }
        }
        if let Some(listener) = self.listener.take() {
            if wake(self.command_addr) {
                if listener.join().is_err() {
                    warn!("[{}] listener thread panicked", self.identity.name);
                }
            } else {
                warn!(
                    "[{}] could not wake listener; leaving it detached",
                    self.identity.name
                );
            }
        }
        info!("[{}] stopped", self.identity.name);
    }
}

impl Drop for DroneInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Unblock a listener by sending it an empty datagram.
fn wake(addr: SocketAddr) -> bool {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    let local: SocketAddr = match ip {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let sent: io::Result<usize> =
        UdpSocket::bind(local).and_then(|s| s.send_to(&[], SocketAddr::new(ip, addr.port())));
    match sent {
        Ok(_) => true,
        Err(e) => {
            warn!("wake datagram to {addr} failed: {e}");
            false
        }
    }
}

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use env_logger::Builder;
use log::{info, LevelFilter};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use drone_protocol_sim::manager::{DEFAULT_COMMAND_PORT, DEFAULT_TELEMETRY_PORT};
use drone_protocol_sim::{
    AddressingMode, FleetLayout, InstanceManager, SimConfig, SnapshotMirror, TelemetryTarget,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Addressing {
    /// Same IP, ports advance by --port-step per drone
    Ports,
    /// Same ports, IP advances by one per drone
    Ips,
}

impl From<Addressing> for AddressingMode {
    fn from(value: Addressing) -> Self {
        match value {
            Addressing::Ports => AddressingMode::SequentialPorts,
            Addressing::Ips => AddressingMode::SequentialIps,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "simulator", about = "Simulated quadcopter fleet speaking the UDP text protocol")]
struct Args {
    /// IP the first drone binds to
    #[arg(long, visible_alias = "host", default_value = "127.0.0.1")]
    ip: IpAddr,

    /// Command port of the first drone (0 = OS-assigned)
    #[arg(long, default_value_t = DEFAULT_COMMAND_PORT)]
    command_port: u16,

    /// Telemetry source port of the first drone (0 = OS-assigned)
    #[arg(long, default_value_t = DEFAULT_TELEMETRY_PORT)]
    telemetry_port: u16,

    /// Number of drones to simulate
    #[arg(short = 'n', long, default_value_t = 1)]
    drones: usize,

    /// How each further drone is addressed
    #[arg(long, value_enum, default_value_t = Addressing::Ports)]
    addressing: Addressing,

    /// Port increment between drones in `ports` addressing
    #[arg(long, default_value_t = 2)]
    port_step: u16,

    /// Send telemetry to this port on the commanding host instead of the sender's port
    #[arg(long)]
    telemetry_peer_port: Option<u16>,

    /// Simulation tuning file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also stream JSON snapshots of every drone to host:port
    #[arg(long)]
    mirror: Option<SocketAddr>,

    /// Snapshot mirror interval in milliseconds
    #[arg(long, default_value_t = 200)]
    mirror_interval_ms: u64,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let own = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("drone_protocol_sim"), own)
        .filter(Some("simulator"), own)
        .parse_default_env()
        .init();
}

/// SIGINT and SIGTERM (what `kill`, systemd and docker send).
///
/// Handlers are registered on install, so a signal arriving during startup
/// still ends in a graceful shutdown.
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("installing SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("installing SIGTERM handler")?,
        })
    }

    async fn recv(&mut self) -> Result<&'static str> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok("SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Result<&'static str> {
        tokio::signal::ctrl_c()
            .await
            .context("waiting for ctrl-c")?;
        Ok("ctrl-c")
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => SimConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SimConfig::default(),
    };

    let layout = FleetLayout {
        base_ip: args.ip,
        command_port: args.command_port,
        telemetry_port: args.telemetry_port,
        count: args.drones,
        mode: args.addressing.into(),
        port_step: args.port_step,
    };
    let target = args
        .telemetry_peer_port
        .map_or(TelemetryTarget::Sender, TelemetryTarget::FixedPort);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building signal runtime")?;
    let mut signals = {
        let _guard = runtime.enter();
        ShutdownSignals::install()?
    };

    let fleet = InstanceManager::start(&layout, &config, target).context("starting drones")?;
    for drone in fleet.instances() {
        info!(
            "{}: command {} telemetry {}",
            drone.name(),
            drone.command_addr(),
            drone.telemetry_addr()
        );
    }

    let mirror = match args.mirror {
        Some(addr) => Some(
            SnapshotMirror::start(
                fleet.state_handles(),
                addr,
                Duration::from_millis(args.mirror_interval_ms.max(1)),
            )
            .with_context(|| format!("starting snapshot mirror to {addr}"))?,
        ),
        None => None,
    };

    let signal = runtime.block_on(signals.recv())?;

    info!("{signal} received, shutting down");
    drop(mirror);
    fleet.shutdown();
    Ok(())
}

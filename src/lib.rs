//! UDP protocol simulator for a fleet of small quadcopters.
//!
//! Each simulated drone owns a command socket (text commands in, `ok` /
//! `error <reason>` / value replies out) and a telemetry socket that streams
//! `key:value;` state frames back to whoever last commanded it.

pub mod broadcaster;
pub mod command;
pub mod config;
pub mod error;
pub mod instance;
pub mod integrator;
pub mod interpreter;
pub mod listener;
pub mod manager;
pub mod mirror;
pub mod state;
pub mod telemetry;

pub use broadcaster::TelemetryTarget;
pub use command::Command;
pub use config::SimConfig;
pub use error::{CommandError, SimError};
pub use instance::{DroneInstance, InstanceSpec};
pub use interpreter::Interpreter;
pub use manager::{AddressingMode, FleetLayout, InstanceManager};
pub use mirror::SnapshotMirror;
pub use state::{DroneSnapshot, DroneState};
pub use telemetry::TelemetryFrame;

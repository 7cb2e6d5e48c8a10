//! Telemetry model: the mutable state of one simulated drone.
//!
//! Fields are private so every mutation goes through a setter that enforces the
//! model invariants:
//! - battery stays within `0..=100` and hitting 0 cuts the motors
//! - `flying` implies `armed`
//! - position and target stay inside the configured [`Bounds`]
//!
//! Invalid values are clamped, never rejected.

use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::ops::{Add, Mul, Sub};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{Bounds, SimConfig};

/// Battery percentage below which snapshots report `LOW_BAT`.
pub const LOW_BATTERY_STATUS: f64 = 15.0;

/// Time-of-flight sensor offset from the airframe's lowest point (cm).
const TOF_OFFSET_CM: f64 = 10.0;

/// Pressure drop per centimetre of height (hPa).
const BARO_HPA_PER_CM: f64 = 0.0012;

/// One instance's state, shared between its listener and ticker threads only.
pub type SharedState = Arc<Mutex<DroneState>>;

/// Lock a drone's state. A panicked holder leaves the state usable, so poisoning is ignored.
pub fn lock(state: &Mutex<DroneState>) -> MutexGuard<'_, DroneState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Bounds {
    pub fn clamp(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            v.x.clamp(-self.horizontal, self.horizontal),
            v.y.clamp(-self.horizontal, self.horizontal),
            v.z.clamp(0.0, self.ceiling),
        )
    }
}

/// Who a drone is and where it listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub index: usize,
    pub name: String,
    pub ip: IpAddr,
    pub command_port: u16,
    pub telemetry_port: u16,
    pub serial: String,
}

/// Stick positions from the `rc` command, each in `-100..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RcSticks {
    pub roll: i32,
    pub pitch: i32,
    pub throttle: i32,
    pub yaw: i32,
}

impl RcSticks {
    pub fn is_centered(&self) -> bool {
        *self == RcSticks::default()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DroneState {
    identity: Identity,
    bounds: Bounds,

    position: Vec3,
    target: Vec3,
    /// cm/s, as observed by the integrator.
    velocity: Vec3,
    /// milli-g, gravity included on z.
    acceleration: Vec3,
    yaw: f64,
    target_yaw: f64,
    pitch: f64,
    roll: f64,
    rc: RcSticks,
    speed: u32,
    leg_speed: Option<f64>,

    battery: f64,
    temp_low: i32,
    temp_high: i32,
    baro_ground: f64,
    flight_time: f64,

    armed: bool,
    flying: bool,
    streaming: bool,
    wifi: Option<WifiCredentials>,
    peer: Option<SocketAddr>,
}

impl DroneState {
    pub fn new(identity: Identity, config: &SimConfig) -> Self {
        Self {
            identity,
            bounds: config.bounds,
            position: Vec3::ZERO,
            target: Vec3::ZERO,
            velocity: Vec3::ZERO,
            acceleration: Vec3::new(0.0, 0.0, -1000.0),
            yaw: 0.0,
            target_yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            rc: RcSticks::default(),
            speed: config.default_speed.clamp(10, 100),
            leg_speed: None,
            battery: 100.0,
            temp_low: config.temp_low,
            temp_high: config.temp_high.max(config.temp_low),
            baro_ground: config.baro_ground,
            flight_time: 0.0,
            armed: false,
            flying: false,
            streaming: false,
            wifi: None,
            peer: None,
        }
    }

    // -- Identity --

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    // -- Kinematics --

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = self.bounds.clamp(position);
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    /// Set the commanded destination, clamped to the bounding volume.
    pub fn set_target(&mut self, target: Vec3) {
        self.target = self.bounds.clamp(target);
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    pub fn acceleration(&self) -> Vec3 {
        self.acceleration
    }

    pub fn set_acceleration(&mut self, acceleration: Vec3) {
        self.acceleration = acceleration;
    }

    /// Unwrapped yaw in degrees; see [`DroneState::reported_yaw`].
    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn set_yaw(&mut self, yaw: f64) {
        self.yaw = yaw;
    }

    /// Yaw folded into `(-180, 180]`, as the flight controller reports it.
    pub fn reported_yaw(&self) -> f64 {
        let folded = self.yaw.rem_euclid(360.0);
        if folded > 180.0 {
            folded - 360.0
        } else {
            folded
        }
    }

    pub fn target_yaw(&self) -> f64 {
        self.target_yaw
    }

    pub fn set_target_yaw(&mut self, target_yaw: f64) {
        self.target_yaw = target_yaw;
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    pub fn roll(&self) -> f64 {
        self.roll
    }

    pub fn set_attitude(&mut self, pitch: f64, roll: f64) {
        self.pitch = pitch.clamp(-180.0, 180.0);
        self.roll = roll.clamp(-180.0, 180.0);
    }

    pub fn rc(&self) -> RcSticks {
        self.rc
    }

    pub fn set_rc(&mut self, rc: RcSticks) {
        self.rc = RcSticks {
            roll: rc.roll.clamp(-100, 100),
            pitch: rc.pitch.clamp(-100, 100),
            throttle: rc.throttle.clamp(-100, 100),
            yaw: rc.yaw.clamp(-100, 100),
        };
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: u32) {
        self.speed = speed.clamp(10, 100);
    }

    /// Speed for the current leg: a `go` override if one is active.
    pub fn travel_speed(&self) -> f64 {
        self.leg_speed.unwrap_or(self.speed as f64)
    }

    pub fn set_leg_speed(&mut self, leg_speed: Option<f64>) {
        self.leg_speed = leg_speed;
    }

    // -- Vitals --

    pub fn battery(&self) -> f64 {
        self.battery
    }

    /// Battery as the integer percentage reported on the wire.
    pub fn battery_percent(&self) -> u8 {
        self.battery.floor().clamp(0.0, 100.0) as u8
    }

    /// Clamp to `0..=100`; an empty battery cuts the motors.
    pub fn set_battery(&mut self, battery: f64) {
        self.battery = if battery.is_nan() {
            0.0
        } else {
            battery.clamp(0.0, 100.0)
        };
        if self.battery <= 0.0 && self.flying {
            self.cut_motors();
        }
    }

    pub fn temperature(&self) -> (i32, i32) {
        (self.temp_low, self.temp_high)
    }

    pub fn set_temperature(&mut self, low: i32, high: i32) {
        self.temp_low = low.min(high);
        self.temp_high = high.max(low);
    }

    pub fn height(&self) -> f64 {
        self.position.z
    }

    pub fn tof(&self) -> f64 {
        self.position.z + TOF_OFFSET_CM
    }

    pub fn baro(&self) -> f64 {
        self.baro_ground - self.position.z * BARO_HPA_PER_CM
    }

    pub fn flight_time(&self) -> f64 {
        self.flight_time
    }

    pub fn set_flight_time(&mut self, seconds: f64) {
        self.flight_time = seconds.max(0.0);
    }

    // -- Flags --

    pub fn armed(&self) -> bool {
        self.armed
    }

    pub fn set_armed(&mut self, armed: bool) {
        self.armed = armed;
        if !armed {
            self.flying = false;
        }
    }

    pub fn flying(&self) -> bool {
        self.flying
    }

    /// Raising `flying` needs an armed drone with charge left; otherwise a no-op.
    pub fn set_flying(&mut self, flying: bool) {
        self.flying = flying && self.armed && self.battery > 0.0;
    }

    pub fn streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    #[cfg(test)]
    pub(crate) fn wifi(&self) -> Option<&WifiCredentials> {
        self.wifi.as_ref()
    }

    pub fn set_wifi(&mut self, wifi: WifiCredentials) {
        self.wifi = Some(wifi);
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    // -- Compound transitions --

    /// Motors off where the drone is: no descent, no drift.
    pub fn cut_motors(&mut self) {
        self.flying = false;
        self.velocity = Vec3::ZERO;
        self.rc = RcSticks::default();
        self.leg_speed = None;
        self.target = self.position;
        self.target_yaw = self.yaw;
        self.pitch = 0.0;
        self.roll = 0.0;
    }

    /// Hold the current position and heading.
    pub fn hover(&mut self) {
        self.rc = RcSticks::default();
        self.leg_speed = None;
        self.target = self.position;
        self.target_yaw = self.yaw;
    }

    /// Back to origin on a full battery, still armed.
    pub fn reset(&mut self) {
        self.cut_motors();
        self.position = Vec3::ZERO;
        self.target = Vec3::ZERO;
        self.yaw = 0.0;
        self.target_yaw = 0.0;
        self.acceleration = Vec3::new(0.0, 0.0, -1000.0);
        self.battery = 100.0;
        self.flight_time = 0.0;
    }

    pub fn snapshot(&self) -> DroneSnapshot {
        DroneSnapshot {
            id: self.identity.index,
            name: self.identity.name.clone(),
            command_port: self.identity.command_port,
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            yaw: self.reported_yaw(),
            battery: self.battery,
            armed: self.armed,
            flying: self.flying,
            status: if self.battery < LOW_BATTERY_STATUS {
                "LOW_BAT".into()
            } else {
                "OK".into()
            },
            ts_ms: now_ms(),
        }
    }
}

/// Read-only copy of a drone's state for observers outside the instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneSnapshot {
    pub id: usize,
    pub name: String,
    pub command_port: u16,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub battery: f64,
    pub armed: bool,
    pub flying: bool,
    pub status: String,
    pub ts_ms: u128,
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) fn test_identity() -> Identity {
    Identity {
        index: 0,
        name: "drone-0".to_string(),
        ip: IpAddr::from([127, 0, 0, 1]),
        command_port: 8889,
        telemetry_port: 8890,
        serial: "0TQTEST0000001".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DroneState {
        DroneState::new(test_identity(), &SimConfig::default())
    }

    #[test]
    fn battery_is_clamped() {
        let mut s = state();
        s.set_battery(140.0);
        assert_eq!(s.battery(), 100.0);
        s.set_battery(-3.0);
        assert_eq!(s.battery(), 0.0);
        s.set_battery(f64::NAN);
        assert_eq!(s.battery(), 0.0);
    }

    #[test]
    fn empty_battery_grounds_the_drone() {
        let mut s = state();
        s.set_armed(true);
        s.set_flying(true);
        assert!(s.flying());
        s.set_battery(0.0);
        assert!(!s.flying());
        s.set_flying(true);
        assert!(!s.flying());
    }

    #[test]
    fn flying_requires_armed() {
        let mut s = state();
        s.set_flying(true);
        assert!(!s.flying());
        s.set_armed(true);
        s.set_flying(true);
        assert!(s.flying());
        s.set_armed(false);
        assert!(!s.flying());
    }

    #[test]
    fn target_is_clamped_to_bounds() {
        let mut s = state();
        s.set_target(Vec3::new(5000.0, -5000.0, -20.0));
        assert_eq!(s.target(), Vec3::new(2000.0, -2000.0, 0.0));
        s.set_target(Vec3::new(0.0, 0.0, 9000.0));
        assert_eq!(s.target().z, 3000.0);
    }

    #[test]
    fn yaw_is_folded_for_reporting() {
        let mut s = state();
        s.set_yaw(270.0);
        assert_eq!(s.reported_yaw(), -90.0);
        s.set_yaw(-190.0);
        assert_eq!(s.reported_yaw(), 170.0);
        s.set_yaw(180.0);
        assert_eq!(s.reported_yaw(), 180.0);
    }

    #[test]
    fn cut_motors_freezes_position() {
        let mut s = state();
        s.set_armed(true);
        s.set_flying(true);
        s.set_position(Vec3::new(10.0, 20.0, 90.0));
        s.set_target(Vec3::new(100.0, 20.0, 90.0));
        s.set_velocity(Vec3::new(50.0, 0.0, 0.0));
        s.cut_motors();
        assert!(!s.flying());
        assert_eq!(s.target(), Vec3::new(10.0, 20.0, 90.0));
        assert_eq!(s.velocity(), Vec3::ZERO);
    }

    #[test]
    fn snapshot_flags_low_battery() {
        let mut s = state();
        assert_eq!(s.snapshot().status, "OK");
        s.set_battery(12.0);
        assert_eq!(s.snapshot().status, "LOW_BAT");
    }
}

//! Command interpreter: applies parsed commands to a [`DroneState`].
//!
//! Every line produces exactly one reply: `ok` for an accepted mutation, the
//! bare value for a query, or `error <reason>`. A rejected command leaves the
//! state untouched.

use log::{debug, info};
use std::fmt;
use std::net::SocketAddr;

use crate::command::{Command, Direction, FlipDirection, Query, Rotation};
use crate::config::SimConfig;
use crate::error::CommandError;
use crate::state::{DroneState, RcSticks, Vec3};

/// Attitude kick applied by `flip`, eased back out by the integrator (deg).
const FLIP_KICK_DEG: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Value(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok => write!(f, "ok"),
            Reply::Value(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Interpreter {
    takeoff_height: f64,
    takeoff_min_battery: u8,
    flip_min_battery: u8,
    wifi_snr: u8,
    sdk_version: String,
}

impl Interpreter {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            takeoff_height: config.takeoff_height,
            takeoff_min_battery: config.takeoff_min_battery,
            flip_min_battery: config.flip_min_battery,
            wifi_snr: config.wifi_snr,
            sdk_version: config.sdk_version.clone(),
        }
    }

    /// Interpret one raw command line and return the reply text.
    pub fn interpret(&self, state: &mut DroneState, line: &str) -> String {
        match Command::parse(line) {
            Ok(command) => self.reply(state, &command),
            Err(err) => err.reply(),
        }
    }

    /// Like [`Interpreter::interpret`], also recording `from` as the telemetry
    /// peer when the line parses into a known command.
    pub fn interpret_from(&self, state: &mut DroneState, line: &str, from: SocketAddr) -> String {
        match Command::parse(line) {
            Ok(command) => {
                state.set_peer(from);
                self.reply(state, &command)
            }
            Err(err) => err.reply(),
        }
    }

    fn reply(&self, state: &mut DroneState, command: &Command) -> String {
        match self.execute(state, command) {
            Ok(reply) => reply.to_string(),
            Err(err) => {
                debug!("[{}] {:?} rejected: {}", state.identity().name, command, err);
                err.reply()
            }
        }
    }

    /// Check preconditions, then apply `command`.
    pub fn execute(&self, state: &mut DroneState, command: &Command) -> Result<Reply, CommandError> {
        match command {
            Command::Arm => state.set_armed(true),
            _ if !state.armed() => return Err(CommandError::NotArmed),

            Command::Takeoff => {
                if state.flying() {
                    return Err(CommandError::AlreadyFlying);
                }
                if state.battery_percent() < self.takeoff_min_battery {
                    return Err(CommandError::BatteryLow);
                }
                let p = state.position();
                state.set_flying(true);
                state.set_flight_time(0.0);
                state.set_target(Vec3::new(p.x, p.y, self.takeoff_height));
                info!("[{}] takeoff", state.identity().name);
            }
            Command::Land => {
                require_flying(state)?;
                let p = state.position();
                state.set_position(Vec3::new(p.x, p.y, 0.0));
                state.cut_motors();
                info!("[{}] landed at ({:.0}, {:.0})", state.identity().name, p.x, p.y);
            }
            Command::Emergency => {
                state.cut_motors();
                info!("[{}] emergency stop", state.identity().name);
            }
            Command::Stop => {
                require_flying(state)?;
                state.hover();
            }
            Command::Reset => {
                state.reset();
                info!("[{}] reset to origin", state.identity().name);
            }

            Command::Move { direction, distance } => {
                require_flying(state)?;
                let d = *distance as f64;
                let delta = match direction {
                    Direction::Up => Vec3::new(0.0, 0.0, d),
                    Direction::Down => Vec3::new(0.0, 0.0, -d),
                    Direction::Left => Vec3::new(0.0, d, 0.0),
                    Direction::Right => Vec3::new(0.0, -d, 0.0),
                    Direction::Forward => Vec3::new(d, 0.0, 0.0),
                    Direction::Back => Vec3::new(-d, 0.0, 0.0),
                };
                state.set_leg_speed(None);
                state.set_target(state.target() + delta);
            }
            Command::Rotate { rotation, degrees } => {
                require_flying(state)?;
                let d = *degrees as f64;
                let delta = match rotation {
                    Rotation::Clockwise => d,
                    Rotation::CounterClockwise => -d,
                };
                state.set_target_yaw(state.target_yaw() + delta);
            }
            Command::Flip(direction) => {
                require_flying(state)?;
                if state.battery_percent() < self.flip_min_battery {
                    return Err(CommandError::BatteryLow);
                }
                let (pitch, roll) = match direction {
                    FlipDirection::Forward => (FLIP_KICK_DEG, 0.0),
                    FlipDirection::Back => (-FLIP_KICK_DEG, 0.0),
                    FlipDirection::Left => (0.0, -FLIP_KICK_DEG),
                    FlipDirection::Right => (0.0, FLIP_KICK_DEG),
                };
                state.set_attitude(pitch, roll);
            }
            Command::Go { x, y, z, speed } => {
                require_flying(state)?;
                let delta = Vec3::new(*x as f64, *y as f64, *z as f64);
                state.set_target(state.target() + delta);
                state.set_leg_speed(Some(*speed as f64));
            }
            Command::Rc {
                roll,
                pitch,
                throttle,
                yaw,
            } => {
                require_flying(state)?;
                state.set_rc(RcSticks {
                    roll: *roll,
                    pitch: *pitch,
                    throttle: *throttle,
                    yaw: *yaw,
                });
            }

            Command::Speed(speed) => state.set_speed(*speed as u32),
            Command::Wifi(credentials) => state.set_wifi(credentials.clone()),
            Command::StreamOn => state.set_streaming(true),
            Command::StreamOff => state.set_streaming(false),

            Command::Query(query) => return Ok(Reply::Value(self.query(state, *query))),
        }
        Ok(Reply::Ok)
    }

    fn query(&self, state: &DroneState, query: Query) -> String {
        match query {
            Query::Battery => state.battery_percent().to_string(),
            Query::Height => whole(state.height()),
            Query::Speed => state.speed().to_string(),
            Query::Time => whole(state.flight_time().floor()),
            Query::Temp => {
                let (low, high) = state.temperature();
                format!("{low}~{high}")
            }
            Query::Attitude => format!(
                "{};{};{}",
                whole(state.pitch()),
                whole(state.roll()),
                whole(state.reported_yaw())
            ),
            Query::Baro => format!("{:.2}", state.baro()),
            Query::Tof => whole(state.tof()),
            Query::Wifi => self.wifi_snr.to_string(),
            Query::Sdk => self.sdk_version.clone(),
            Query::Serial => state.identity().serial.clone(),
            Query::Acceleration => {
                let a = state.acceleration();
                format!("{:.1};{:.1};{:.1}", a.x, a.y, a.z)
            }
        }
    }
}

fn require_flying(state: &DroneState) -> Result<(), CommandError> {
    if state.flying() {
        Ok(())
    } else {
        Err(CommandError::NotFlying)
    }
}

/// Round for integer wire fields.
pub(crate) fn whole(v: f64) -> String {
    let r = v.round() as i64;
    r.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_identity;

    fn setup() -> (Interpreter, DroneState) {
        let config = SimConfig::default();
        (
            Interpreter::new(&config),
            DroneState::new(test_identity(), &config),
        )
    }

    fn airborne() -> (Interpreter, DroneState) {
        let (i, mut s) = setup();
        assert_eq!(i.interpret(&mut s, "command"), "ok");
        assert_eq!(i.interpret(&mut s, "takeoff"), "ok");
        (i, s)
    }

    #[test]
    fn unknown_verb() {
        let (i, mut s) = setup();
        assert_eq!(i.interpret(&mut s, "barrel-roll"), "error Unknown command");
    }

    #[test]
    fn everything_but_command_needs_arming() {
        let (i, mut s) = setup();
        for line in ["takeoff", "battery?", "speed 20", "streamon", "emergency"] {
            assert_eq!(i.interpret(&mut s, line), "error Not armed", "{line}");
        }
        assert_eq!(i.interpret(&mut s, "command"), "ok");
        assert!(s.armed());
    }

    #[test]
    fn range_errors_take_priority_over_preconditions() {
        let (i, mut s) = setup();
        assert_eq!(i.interpret(&mut s, "up 19"), "error Out of range");
        assert_eq!(i.interpret(&mut s, "up abc"), "error Invalid argument");
        assert_eq!(i.interpret(&mut s, "up 50"), "error Not armed");
        i.interpret(&mut s, "command");
        assert_eq!(i.interpret(&mut s, "up 50"), "error Not flying");
    }

    #[test]
    fn takeoff_sets_hover_target() {
        let (i, mut s) = airborne();
        assert!(s.flying());
        assert_eq!(s.target().z, 80.0);
        assert_eq!(i.interpret(&mut s, "takeoff"), "error Already flying");
    }

    #[test]
    fn takeoff_refused_on_low_battery() {
        let (i, mut s) = setup();
        i.interpret(&mut s, "command");
        s.set_battery(5.0);
        assert_eq!(i.interpret(&mut s, "takeoff"), "error Battery low");
        assert!(!s.flying());
    }

    #[test]
    fn movement_shifts_target_by_exact_delta() {
        let cases = [
            ("up 50", Vec3::new(0.0, 0.0, 50.0)),
            ("down 20", Vec3::new(0.0, 0.0, -20.0)),
            ("left 30", Vec3::new(0.0, 30.0, 0.0)),
            ("right 40", Vec3::new(0.0, -40.0, 0.0)),
            ("forward 500", Vec3::new(500.0, 0.0, 0.0)),
            ("back 25", Vec3::new(-25.0, 0.0, 0.0)),
        ];
        for (line, delta) in cases {
            let (i, mut s) = airborne();
            let before = s.target();
            assert_eq!(i.interpret(&mut s, line), "ok", "{line}");
            assert_eq!(s.target(), before + delta, "{line}");
        }
    }

    #[test]
    fn rejected_movement_leaves_state_unchanged() {
        let (i, mut s) = airborne();
        let target = s.target();
        let yaw = s.target_yaw();
        for line in ["up 501", "left 0", "cw 361", "ccw 0", "forward x"] {
            assert!(i.interpret(&mut s, line).starts_with("error"), "{line}");
        }
        assert_eq!(s.target(), target);
        assert_eq!(s.target_yaw(), yaw);
    }

    #[test]
    fn rotation_moves_target_yaw() {
        let (i, mut s) = airborne();
        assert_eq!(i.interpret(&mut s, "cw 90"), "ok");
        assert_eq!(i.interpret(&mut s, "ccw 30"), "ok");
        assert_eq!(s.target_yaw(), 60.0);
    }

    #[test]
    fn land_settles_on_the_ground() {
        let (i, mut s) = airborne();
        s.set_position(Vec3::new(40.0, 0.0, 120.0));
        assert_eq!(i.interpret(&mut s, "land"), "ok");
        assert!(!s.flying());
        assert_eq!(i.interpret(&mut s, "height?"), "0");
        assert_eq!(s.target(), Vec3::new(40.0, 0.0, 0.0));
        assert_eq!(i.interpret(&mut s, "land"), "error Not flying");
    }

    #[test]
    fn emergency_freezes_in_place() {
        let (i, mut s) = airborne();
        s.set_position(Vec3::new(0.0, 0.0, 60.0));
        assert_eq!(i.interpret(&mut s, "emergency"), "ok");
        assert!(!s.flying());
        assert_eq!(s.target(), Vec3::new(0.0, 0.0, 60.0));
        assert_eq!(s.velocity(), Vec3::ZERO);
    }

    #[test]
    fn reset_returns_to_origin_with_full_battery() {
        let (i, mut s) = airborne();
        s.set_position(Vec3::new(100.0, 50.0, 80.0));
        s.set_battery(42.0);
        assert_eq!(i.interpret(&mut s, "reset"), "ok");
        assert_eq!(s.position(), Vec3::ZERO);
        assert_eq!(s.battery(), 100.0);
        assert!(s.armed());
        assert!(!s.flying());
    }

    #[test]
    fn queries_reply_with_values() {
        let (i, mut s) = airborne();
        assert_eq!(i.interpret(&mut s, "battery?"), "100");
        assert_eq!(i.interpret(&mut s, "height?"), "0");
        assert_eq!(i.interpret(&mut s, "speed?"), "50");
        assert_eq!(i.interpret(&mut s, "time?"), "0");
        assert_eq!(i.interpret(&mut s, "temp?"), "20~25");
        assert_eq!(i.interpret(&mut s, "attitude?"), "0;0;0");
        assert_eq!(i.interpret(&mut s, "baro?"), "1013.25");
        assert_eq!(i.interpret(&mut s, "tof?"), "10");
        assert_eq!(i.interpret(&mut s, "wifi?"), "90");
        assert_eq!(i.interpret(&mut s, "sdk?"), "20");
        assert_eq!(i.interpret(&mut s, "sn?"), "0TQTEST0000001");
        assert_eq!(i.interpret(&mut s, "acceleration?"), "0.0;0.0;-1000.0");
    }

    #[test]
    fn settings() {
        let (i, mut s) = setup();
        i.interpret(&mut s, "command");
        assert_eq!(i.interpret(&mut s, "speed 75"), "ok");
        assert_eq!(i.interpret(&mut s, "speed?"), "75");
        assert_eq!(i.interpret(&mut s, "streamon"), "ok");
        assert!(s.streaming());
        assert_eq!(i.interpret(&mut s, "streamoff"), "ok");
        assert!(!s.streaming());
        assert_eq!(i.interpret(&mut s, "wifi hangar hunter2"), "ok");
        assert_eq!(s.wifi().map(|w| w.ssid.as_str()), Some("hangar"));
    }

    #[test]
    fn flip_needs_charge() {
        let (i, mut s) = airborne();
        assert_eq!(i.interpret(&mut s, "flip l"), "ok");
        assert_eq!(s.roll(), -90.0);
        s.set_battery(30.0);
        assert_eq!(i.interpret(&mut s, "flip r"), "error Battery low");
    }

    #[test]
    fn go_sets_leg_speed() {
        let (i, mut s) = airborne();
        assert_eq!(i.interpret(&mut s, "go 100 -50 30 80"), "ok");
        assert_eq!(s.target(), Vec3::new(100.0, -50.0, 110.0));
        assert_eq!(s.travel_speed(), 80.0);
        assert_eq!(i.interpret(&mut s, "up 20"), "ok");
        assert_eq!(s.travel_speed(), 50.0);
    }

    #[test]
    fn stop_cancels_pending_motion() {
        let (i, mut s) = airborne();
        i.interpret(&mut s, "rc 0 50 0 0");
        i.interpret(&mut s, "forward 300");
        assert_eq!(i.interpret(&mut s, "stop"), "ok");
        assert_eq!(s.target(), s.position());
        assert!(s.rc().is_centered());
    }

    #[test]
    fn peer_recorded_only_for_known_commands() {
        let (i, mut s) = setup();
        let from: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert_eq!(i.interpret_from(&mut s, "garbage", from), "error Unknown command");
        assert_eq!(s.peer(), None);
        assert_eq!(i.interpret_from(&mut s, "battery?", from), "error Not armed");
        assert_eq!(s.peer(), Some(from));
    }
}

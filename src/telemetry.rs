//! Wire format of the telemetry broadcast.
//!
//! One datagram is a run of `key:value;` pairs in a fixed order, e.g.
//! `mid:-1;x:0;y:0;z:0;pitch:0;roll:0;yaw:0;vgx:0;vgy:0;vgz:0;templ:20;temph:25;tof:10;h:0;bat:100;baro:1013.25;time:0;agx:0.0;agy:0.0;agz:-1000.0;`

use std::fmt;
use std::str::FromStr;

use crate::state::DroneState;

/// Keys in the order they appear on the wire.
pub const FIELD_ORDER: [&str; 20] = [
    "mid", "x", "y", "z", "pitch", "roll", "yaw", "vgx", "vgy", "vgz", "templ", "temph", "tof",
    "h", "bat", "baro", "time", "agx", "agy", "agz",
];

/// No mission pad is ever detected.
const NO_MISSION_PAD: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub mid: i32,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub pitch: i32,
    pub roll: i32,
    pub yaw: i32,
    /// Velocities in dm/s.
    pub vgx: i32,
    pub vgy: i32,
    pub vgz: i32,
    pub templ: i32,
    pub temph: i32,
    pub tof: i32,
    pub h: i32,
    pub bat: u8,
    pub baro: f64,
    pub time: u32,
    /// Acceleration in milli-g.
    pub agx: f64,
    pub agy: f64,
    pub agz: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryParseError {
    #[error("field {index}: expected `{expected}`, found `{found}`")]
    UnexpectedKey {
        index: usize,
        expected: &'static str,
        found: String,
    },

    #[error("field `{0}` is missing")]
    MissingField(&'static str),

    #[error("field `{0}` has an invalid value")]
    InvalidValue(&'static str),

    #[error("unexpected data after the last field")]
    TrailingData,
}

impl TelemetryFrame {
    pub fn from_state(state: &DroneState) -> Self {
        let p = state.position();
        let v = state.velocity();
        let a = state.acceleration();
        let (templ, temph) = state.temperature();
        Self {
            mid: NO_MISSION_PAD,
            x: round(p.x),
            y: round(p.y),
            z: round(p.z),
            pitch: round(state.pitch()),
            roll: round(state.roll()),
            yaw: round(state.reported_yaw()),
            vgx: round(v.x / 10.0),
            vgy: round(v.y / 10.0),
            vgz: round(v.z / 10.0),
            templ,
            temph,
            tof: round(state.tof()),
            h: round(state.height()),
            bat: state.battery_percent(),
            baro: decimals(state.baro(), 2),
            time: state.flight_time().max(0.0).floor() as u32,
            agx: decimals(a.x, 1),
            agy: decimals(a.y, 1),
            agz: decimals(a.z, 1),
        }
    }

    /// Offset the barometer reading, keeping wire precision.
    pub fn jitter_baro(&mut self, offset: f64) {
        self.baro = decimals(self.baro + offset, 2);
    }

    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

fn round(v: f64) -> i32 {
    v.round() as i32
}

/// Round to the printed precision so a frame survives a wire round trip; `+ 0.0` drops `-0`.
fn decimals(v: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (v * scale).round() / scale + 0.0
}

impl fmt::Display for TelemetryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mid:{};x:{};y:{};z:{};pitch:{};roll:{};yaw:{};vgx:{};vgy:{};vgz:{};\
             templ:{};temph:{};tof:{};h:{};bat:{};baro:{:.2};time:{};agx:{:.1};agy:{:.1};agz:{:.1};",
            self.mid,
            self.x,
            self.y,
            self.z,
            self.pitch,
            self.roll,
            self.yaw,
            self.vgx,
            self.vgy,
            self.vgz,
            self.templ,
            self.temph,
            self.tof,
            self.h,
            self.bat,
            self.baro,
            self.time,
            self.agx,
            self.agy,
            self.agz,
        )
    }
}

impl FromStr for TelemetryFrame {
    type Err = TelemetryParseError;

    /// Strict parse: every field, in wire order, each terminated by `;`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim_end_matches(['\r', '\n']);
        let mut pairs = body.split_terminator(';');
        let mut values = [""; FIELD_ORDER.len()];

        for (index, (slot, expected)) in values.iter_mut().zip(FIELD_ORDER).enumerate() {
            let pair = pairs.next().ok_or(TelemetryParseError::MissingField(expected))?;
            let (key, value) = pair
                .split_once(':')
                .ok_or(TelemetryParseError::InvalidValue(expected))?;
            if key != expected {
                return Err(TelemetryParseError::UnexpectedKey {
                    index,
                    expected,
                    found: key.to_string(),
                });
            }
            *slot = value;
        }
        if pairs.next().is_some() || !body.ends_with(';') {
            return Err(TelemetryParseError::TrailingData);
        }

        fn field<T: FromStr>(values: &[&str], index: usize) -> Result<T, TelemetryParseError> {
            values[index]
                .parse()
                .map_err(|_| TelemetryParseError::InvalidValue(FIELD_ORDER[index]))
        }

        Ok(Self {
            mid: field(&values, 0)?,
            x: field(&values, 1)?,
            y: field(&values, 2)?,
            z: field(&values, 3)?,
            pitch: field(&values, 4)?,
            roll: field(&values, 5)?,
            yaw: field(&values, 6)?,
            vgx: field(&values, 7)?,
            vgy: field(&values, 8)?,
            vgz: field(&values, 9)?,
            templ: field(&values, 10)?,
            temph: field(&values, 11)?,
            tof: field(&values, 12)?,
            h: field(&values, 13)?,
            bat: field(&values, 14)?,
            baro: field(&values, 15)?,
            time: field(&values, 16)?,
            agx: field(&values, 17)?,
            agy: field(&values, 18)?,
            agz: field(&values, 19)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::integrator::{advance, FlightModel};
    use crate::interpreter::Interpreter;
    use crate::state::test_identity;
    use std::time::Duration;

    const IDLE: &str = "mid:-1;x:0;y:0;z:0;pitch:0;roll:0;yaw:0;vgx:0;vgy:0;vgz:0;templ:20;temph:25;tof:10;h:0;bat:100;baro:1013.25;time:0;agx:0.0;agy:0.0;agz:-1000.0;";

    #[test]
    fn idle_drone_matches_reference_frame() {
        let state = DroneState::new(test_identity(), &SimConfig::default());
        assert_eq!(TelemetryFrame::from_state(&state).to_wire(), IDLE);
    }

    #[test]
    fn reference_frame_parses() {
        let frame: TelemetryFrame = IDLE.parse().unwrap();
        assert_eq!(frame.bat, 100);
        assert_eq!(frame.baro, 1013.25);
        assert_eq!(frame.agz, -1000.0);
        assert_eq!(frame.to_wire(), IDLE);
    }

    #[test]
    fn frames_of_a_flight_keep_field_order() {
        let config = SimConfig::default();
        let interpreter = Interpreter::new(&config);
        let model = FlightModel::from_config(&config);
        let mut state = DroneState::new(test_identity(), &config);
        for line in ["command", "takeoff", "forward 120", "ccw 200", "left 80"] {
            interpreter.interpret(&mut state, line);
        }
        for _ in 0..60 {
            advance(&mut state, Duration::from_millis(50), &model);
            let wire = TelemetryFrame::from_state(&state).to_wire();
            let keys: Vec<&str> = wire
                .split_terminator(';')
                .map(|pair| pair.split(':').next().unwrap_or_default())
                .collect();
            assert_eq!(keys, FIELD_ORDER);
            let parsed: TelemetryFrame = wire.parse().unwrap();
            assert_eq!(parsed.to_wire(), wire);
        }
    }

    #[test]
    fn rejects_reordered_and_truncated_frames() {
        let swapped = IDLE.replacen("x:0;y:0;", "y:0;x:0;", 1);
        assert!(matches!(
            swapped.parse::<TelemetryFrame>(),
            Err(TelemetryParseError::UnexpectedKey { index: 1, .. })
        ));
        let truncated = &IDLE[..IDLE.find("bat").unwrap()];
        assert_eq!(
            truncated.parse::<TelemetryFrame>(),
            Err(TelemetryParseError::MissingField("bat"))
        );
        let extra = format!("{IDLE}mp:1;");
        assert_eq!(
            extra.parse::<TelemetryFrame>(),
            Err(TelemetryParseError::TrailingData)
        );
        let bad = IDLE.replace("bat:100", "bat:full");
        assert_eq!(
            bad.parse::<TelemetryFrame>(),
            Err(TelemetryParseError::InvalidValue("bat"))
        );
    }
}

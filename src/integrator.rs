//! Movement integrator: advances a drone between commands.
//!
//! Not a flight model. Position approaches the target with an exponential ease
//! that never drops below the configured travel speed, so long moves cover
//! most of the distance quickly and short ones still finish in bounded time.
//!
//! A drone whose battery runs out mid-air has its motors cut where it is, like
//! `emergency`: it stays frozen at its last position with `flying` cleared.

use log::warn;
use std::time::Duration;

use crate::config::SimConfig;
use crate::state::{DroneState, Vec3};

/// Distance under which the drone snaps onto its target (cm / deg).
const ARRIVAL_EPSILON: f64 = 0.5;

/// Tilt reached at full stick speed (deg).
const MAX_TILT_DEG: f64 = 25.0;
const FULL_TILT_SPEED: f64 = 100.0;

/// cm/s² to milli-g.
const MILLI_G_PER_CMS2: f64 = 1000.0 / 980.665;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightModel {
    pub ease_rate: f64,
    pub yaw_rate: f64,
    pub flight_drain: f64,
    pub idle_drain: f64,
}

impl FlightModel {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            ease_rate: config.ease_rate.max(0.0),
            yaw_rate: config.yaw_rate.max(1.0),
            flight_drain: config.flight_drain.max(0.0),
            idle_drain: config.idle_drain.max(0.0),
        }
    }
}

/// Advance `state` by `dt` of wall-clock time.
pub fn advance(state: &mut DroneState, dt: Duration, model: &FlightModel) {
    let secs = dt.as_secs_f64();
    if secs <= 0.0 {
        return;
    }

    if state.flying() {
        apply_sticks(state, secs, model);
    }

    // Position
    let before = state.position();
    let delta = state.target() - before;
    let distance = delta.length();
    let next = if distance <= ARRIVAL_EPSILON {
        state.set_leg_speed(None);
        state.target()
    } else {
        let step = approach_step(distance, state.travel_speed(), model.ease_rate, secs);
        if step >= distance {
            state.set_leg_speed(None);
            state.target()
        } else {
            before + delta * (step / distance)
        }
    };
    state.set_position(next);

    let velocity = (state.position() - before) * (1.0 / secs);
    let accel = (velocity - state.velocity()) * (1.0 / secs);
    state.set_velocity(velocity);
    state.set_acceleration(Vec3::new(
        accel.x * MILLI_G_PER_CMS2,
        accel.y * MILLI_G_PER_CMS2,
        -1000.0 - accel.z * MILLI_G_PER_CMS2,
    ));

    // Heading
    let yaw_delta = state.target_yaw() - state.yaw();
    if yaw_delta.abs() <= ARRIVAL_EPSILON {
        state.set_yaw(state.target_yaw());
    } else {
        let step = approach_step(yaw_delta.abs(), model.yaw_rate, model.ease_rate, secs);
        state.set_yaw(state.yaw() + yaw_delta.signum() * step);
    }

    // Attitude leans into the motion and settles when grounded.
    let (tilt_pitch, tilt_roll) = if state.flying() {
        (tilt(velocity.x), tilt(-velocity.y))
    } else {
        (0.0, 0.0)
    };
    let blend = 1.0 - (-model.ease_rate * secs).exp();
    state.set_attitude(
        state.pitch() + (tilt_pitch - state.pitch()) * blend,
        state.roll() + (tilt_roll - state.roll()) * blend,
    );

    // Battery and flight clock
    let was_flying = state.flying();
    let drain = if was_flying {
        model.flight_drain
    } else {
        model.idle_drain
    };
    if drain > 0.0 {
        state.set_battery(state.battery() - drain * secs);
    }
    if was_flying && !state.flying() {
        warn!(
            "[{}] battery depleted, motors cut at height {:.0} cm",
            state.identity().name,
            state.height()
        );
    }
    if state.flying() {
        state.set_flight_time(state.flight_time() + secs);
    }
}

fn apply_sticks(state: &mut DroneState, secs: f64, model: &FlightModel) {
    let rc = state.rc();
    if rc.is_centered() {
        return;
    }
    let speed = state.speed() as f64;
    let pct = |v: i32| v as f64 / 100.0;
    let v = Vec3::new(
        pct(rc.pitch) * speed,
        -pct(rc.roll) * speed,
        pct(rc.throttle) * speed,
    );
    state.set_leg_speed(None);
    state.set_target(state.target() + v * secs);
    state.set_target_yaw(state.target_yaw() + pct(rc.yaw) * model.yaw_rate * secs);
}

/// Distance covered this tick: exponential ease, floored at `rate`, capped at `remaining`.
fn approach_step(remaining: f64, rate: f64, ease_rate: f64, secs: f64) -> f64 {
    let eased = remaining * (1.0 - (-ease_rate * secs).exp());
    eased.max(rate * secs).min(remaining)
}

fn tilt(speed: f64) -> f64 {
    (speed / FULL_TILT_SPEED * MAX_TILT_DEG).clamp(-MAX_TILT_DEG, MAX_TILT_DEG)
}

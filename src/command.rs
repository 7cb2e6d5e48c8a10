//! Parsing of command datagrams into [`Command`].
//!
//! Parsing only checks syntax and argument ranges. State preconditions (armed,
//! flying, battery) are the interpreter's business.

use std::ops::RangeInclusive;

use crate::error::CommandError;
use crate::state::WifiCredentials;

pub const MOVE_RANGE: RangeInclusive<i32> = 20..=500;
pub const ROTATE_RANGE: RangeInclusive<i32> = 1..=360;
pub const SPEED_RANGE: RangeInclusive<i32> = 10..=100;
pub const GO_RANGE: RangeInclusive<i32> = -500..=500;
/// `go` refuses legs where every axis stays inside this dead zone.
pub const GO_DEAD_ZONE: i32 = 20;
pub const RC_RANGE: RangeInclusive<i32> = -100..=100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Battery,
    Height,
    Speed,
    Time,
    Temp,
    Attitude,
    Baro,
    Tof,
    Wifi,
    Sdk,
    Serial,
    Acceleration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Enter SDK mode.
    Arm,
    Takeoff,
    Land,
    Emergency,
    Stop,
    Reset,
    Move { direction: Direction, distance: i32 },
    Rotate { rotation: Rotation, degrees: i32 },
    Flip(FlipDirection),
    Go { x: i32, y: i32, z: i32, speed: i32 },
    Rc { roll: i32, pitch: i32, throttle: i32, yaw: i32 },
    Speed(i32),
    Wifi(WifiCredentials),
    StreamOn,
    StreamOff,
    Query(Query),
}

impl Command {
    /// Parse one command line. Surrounding whitespace is ignored.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(CommandError::UnknownCommand)?;
        let args: Vec<&str> = tokens.collect();

        let command = match verb {
            "command" => nullary(&args, Command::Arm)?,
            "takeoff" => nullary(&args, Command::Takeoff)?,
            "land" => nullary(&args, Command::Land)?,
            "emergency" => nullary(&args, Command::Emergency)?,
            "stop" => nullary(&args, Command::Stop)?,
            "reset" => nullary(&args, Command::Reset)?,
            "streamon" => nullary(&args, Command::StreamOn)?,
            "streamoff" => nullary(&args, Command::StreamOff)?,

            "up" => movement(&args, Direction::Up)?,
            "down" => movement(&args, Direction::Down)?,
            "left" => movement(&args, Direction::Left)?,
            "right" => movement(&args, Direction::Right)?,
            "forward" => movement(&args, Direction::Forward)?,
            "back" => movement(&args, Direction::Back)?,

            "cw" => rotation(&args, Rotation::Clockwise)?,
            "ccw" => rotation(&args, Rotation::CounterClockwise)?,

            "flip" => {
                let [dir] = exact::<1>(&args)?;
                let dir = match dir {
                    "l" => FlipDirection::Left,
                    "r" => FlipDirection::Right,
                    "f" => FlipDirection::Forward,
                    "b" => FlipDirection::Back,
                    _ => return Err(CommandError::InvalidArgument),
                };
                Command::Flip(dir)
            }
            "go" => {
                let [x, y, z, speed] = integers::<4>(&args)?;
                for v in [x, y, z] {
                    in_range(v, &GO_RANGE)?;
                }
                in_range(speed, &SPEED_RANGE)?;
                if [x, y, z].iter().all(|v| v.abs() <= GO_DEAD_ZONE) {
                    return Err(CommandError::OutOfRange);
                }
                Command::Go { x, y, z, speed }
            }
            "rc" => {
                let [roll, pitch, throttle, yaw] = integers::<4>(&args)?;
                for v in [roll, pitch, throttle, yaw] {
                    in_range(v, &RC_RANGE)?;
                }
                Command::Rc {
                    roll,
                    pitch,
                    throttle,
                    yaw,
                }
            }
            "speed" => {
                let [speed] = integers::<1>(&args)?;
                Command::Speed(in_range(speed, &SPEED_RANGE)?)
            }
            "wifi" => {
                let [ssid, password] = exact::<2>(&args)?;
                Command::Wifi(WifiCredentials {
                    ssid: ssid.to_string(),
                    password: password.to_string(),
                })
            }

            query if query.ends_with('?') => {
                let query = match query {
                    "battery?" => Query::Battery,
                    "height?" => Query::Height,
                    "speed?" => Query::Speed,
                    "time?" => Query::Time,
                    "temp?" => Query::Temp,
                    "attitude?" => Query::Attitude,
                    "baro?" => Query::Baro,
                    "tof?" => Query::Tof,
                    "wifi?" => Query::Wifi,
                    "sdk?" => Query::Sdk,
                    "sn?" => Query::Serial,
                    "acceleration?" => Query::Acceleration,
                    _ => return Err(CommandError::UnknownCommand),
                };
                nullary(&args, Command::Query(query))?
            }

            _ => return Err(CommandError::UnknownCommand),
        };
        Ok(command)
    }
}

fn nullary(args: &[&str], command: Command) -> Result<Command, CommandError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(CommandError::InvalidArgument)
    }
}

fn movement(args: &[&str], direction: Direction) -> Result<Command, CommandError> {
    let [distance] = integers::<1>(args)?;
    Ok(Command::Move {
        direction,
        distance: in_range(distance, &MOVE_RANGE)?,
    })
}

fn rotation(args: &[&str], rotation: Rotation) -> Result<Command, CommandError> {
    let [degrees] = integers::<1>(args)?;
    Ok(Command::Rotate {
        rotation,
        degrees: in_range(degrees, &ROTATE_RANGE)?,
    })
}

fn exact<'a, const N: usize>(args: &[&'a str]) -> Result<[&'a str; N], CommandError> {
    <[&str; N]>::try_from(args).map_err(|_| CommandError::InvalidArgument)
}

/// Parse every argument before range checks so a bad token wins over a bad value.
fn integers<const N: usize>(args: &[&str]) -> Result<[i32; N], CommandError> {
    let tokens = exact::<N>(args)?;
    let mut values = [0; N];
    for (value, token) in values.iter_mut().zip(tokens) {
        *value = parse_integer(token)?;
    }
    Ok(values)
}

fn parse_integer(token: &str) -> Result<i32, CommandError> {
    if let Ok(v) = token.parse::<i32>() {
        return Ok(v);
    }
    // Syntactically an integer but too large for i32 is still a range problem.
    let digits = token.strip_prefix(['-', '+']).unwrap_or(token);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Err(CommandError::OutOfRange)
    } else {
        Err(CommandError::InvalidArgument)
    }
}

fn in_range(value: i32, range: &RangeInclusive<i32>) -> Result<i32, CommandError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(CommandError::OutOfRange)
    }
}

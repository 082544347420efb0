use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{BrakeMethod, HomeDirection, ParseError};

/// Every command the firmware understands. The wire codes are fixed by the firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandId {
    Move,
    MoveTo,
    Continuous,
    Brake,
    Home,
    Stop,
    SetSpeed,
    SetAccel,
    SetBrakeFree,
    SetBrakeCool,
    SetBrakeHard,
    SetClosedLoopEnable,
    SetClosedLoopDisable,
    RecordStart,
    RecordStop,
    RecordAdd,
    RecordPlay,
    RecordPause,
    RequestData,
    RequestConfig,
}

impl CommandId {
    pub const ALL: [CommandId; 20] = [
        CommandId::Move,
        CommandId::MoveTo,
        CommandId::Continuous,
        CommandId::Brake,
        CommandId::Home,
        CommandId::Stop,
        CommandId::SetSpeed,
        CommandId::SetAccel,
        CommandId::SetBrakeFree,
        CommandId::SetBrakeCool,
        CommandId::SetBrakeHard,
        CommandId::SetClosedLoopEnable,
        CommandId::SetClosedLoopDisable,
        CommandId::RecordStart,
        CommandId::RecordStop,
        CommandId::RecordAdd,
        CommandId::RecordPlay,
        CommandId::RecordPause,
        CommandId::RequestData,
        CommandId::RequestConfig,
    ];

    pub fn code(self) -> &'static str {
        use CommandId::*;
        match self {
            Move => "G0",
            MoveTo => "G1",
            Continuous => "G2",
            Brake => "G3",
            Home => "G4",
            Stop => "M0",
            SetSpeed => "M1",
            SetAccel => "M2",
            SetBrakeFree => "M3",
            SetBrakeCool => "M4",
            SetBrakeHard => "M5",
            SetClosedLoopEnable => "M6",
            SetClosedLoopDisable => "M7",
            RecordStart => "M10",
            RecordStop => "M11",
            RecordAdd => "M12",
            RecordPlay => "M13",
            RecordPause => "M14",
            RequestData => "M15",
            RequestConfig => "M16",
        }
    }

    pub fn from_code(code: &str) -> Option<CommandId> {
        CommandId::ALL.into_iter().find(|id| id.code() == code)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A parameter value. The firmware echoes floats with two decimals and counts
/// as plain integers, so that's how we send them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_finite() => write!(f, "{x:.2}"),
            // "NaN" or "inf" would not even be a token the device can split.
            Value::Float(_) => f.write_str("0.00"),
        }
    }
}

/// Encodes a command token: the command code, then one `<LETTER><VALUE>`
/// per parameter, in the given order, separated by single spaces.
///
/// This only guarantees that the token is well-formed; whether the values
/// make sense is up to the caller.
pub fn encode(id: CommandId, params: &[(char, Value)]) -> String {
    let mut ret = id.code().to_owned();
    for (letter, value) in params {
        debug_assert!(letter.is_ascii_alphabetic());
        ret.push(' ');
        ret.push(letter.to_ascii_uppercase());
        ret.push_str(&value.to_string());
    }
    ret
}

/// Splits a command token into its code and parameters. This is the device's
/// side of [`encode`], used by the simulator.
pub fn split(token: &str) -> Result<(CommandId, Vec<(char, f64)>), ParseError> {
    let mut parts = token.split_whitespace();
    let code = parts.next().ok_or(ParseError::EmptyCommand)?;
    let id = CommandId::from_code(code).ok_or_else(|| ParseError::UnknownCommand(code.to_owned()))?;

    let params = parts
        .map(|p| {
            let mut chars = p.chars();
            let letter = chars
                .next()
                .filter(char::is_ascii_uppercase)
                .ok_or_else(|| ParseError::BadParam(p.to_owned()))?;
            let value = chars
                .as_str()
                .parse::<f64>()
                .map_err(|_| ParseError::BadParam(p.to_owned()))?;
            Ok((letter, value))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((id, params))
}

/// A typed command, carrying the parameters that its code requires.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Relative move, in microsteps.
    Move { steps: i64 },
    /// Absolute move, in microsteps.
    MoveTo { steps: i64 },
    /// Run continuously at this velocity (steps/s).
    Continuous { velocity: f64 },
    Brake,
    Home {
        /// rpm
        velocity: f64,
        threshold: i32,
        direction: HomeDirection,
    },
    Stop,
    SetSpeed { velocity: f64 },
    SetAccel { acceleration: f64 },
    SetBrake(BrakeMethod),
    SetClosedLoop(bool),
    RecordStart,
    RecordStop,
    RecordAdd,
    RecordPlay,
    RecordPause,
    RequestData,
    RequestConfig,
}

impl Command {
    pub fn id(&self) -> CommandId {
        use CommandId as Id;
        match self {
            Command::Move { .. } => Id::Move,
            Command::MoveTo { .. } => Id::MoveTo,
            Command::Continuous { .. } => Id::Continuous,
            Command::Brake => Id::Brake,
            Command::Home { .. } => Id::Home,
            Command::Stop => Id::Stop,
            Command::SetSpeed { .. } => Id::SetSpeed,
            Command::SetAccel { .. } => Id::SetAccel,
            Command::SetBrake(BrakeMethod::Free) => Id::SetBrakeFree,
            Command::SetBrake(BrakeMethod::Cool) => Id::SetBrakeCool,
            Command::SetBrake(BrakeMethod::Hard) => Id::SetBrakeHard,
            Command::SetClosedLoop(true) => Id::SetClosedLoopEnable,
            Command::SetClosedLoop(false) => Id::SetClosedLoopDisable,
            Command::RecordStart => Id::RecordStart,
            Command::RecordStop => Id::RecordStop,
            Command::RecordAdd => Id::RecordAdd,
            Command::RecordPlay => Id::RecordPlay,
            Command::RecordPause => Id::RecordPause,
            Command::RequestData => Id::RequestData,
            Command::RequestConfig => Id::RequestConfig,
        }
    }

    pub fn params(&self) -> Vec<(char, Value)> {
        match *self {
            Command::Move { steps } | Command::MoveTo { steps } => vec![('A', Value::Int(steps))],
            Command::Continuous { velocity } | Command::SetSpeed { velocity } => {
                vec![('A', Value::Float(velocity))]
            }
            Command::SetAccel { acceleration } => vec![('A', Value::Float(acceleration))],
            Command::Home {
                velocity,
                threshold,
                direction,
            } => vec![
                ('V', Value::Float(velocity)),
                ('T', Value::Int(threshold.into())),
                ('D', Value::Int(direction.wire())),
            ],
            _ => Vec::new(),
        }
    }

    pub fn encode(&self) -> String {
        encode(self.id(), &self.params())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

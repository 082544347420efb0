//! The text protocol spoken by the uStepper's WebSocket control channel.
//!
//! Commands go out as short g-code-like tokens (`G0 A3200`, `M1 A120.00`) and
//! the device answers with tagged frames (`OK`, `DATA ...`, `CONF ...`, `DONE`,
//! `LINE <n>`, `END`). Everything here is pure: no I/O happens in this crate.

use serde::{Deserialize, Serialize};

pub mod command;
pub mod frame;

pub use command::{encode, Command, CommandId, Value};
pub use frame::{parse, Frame, Tag};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{tag} frame has {found} fields, but {expected} are needed")]
    MissingField {
        tag: Tag,
        expected: usize,
        found: usize,
    },
    #[error("{tag} field {index} ({field:?}) is not a number")]
    BadNumber {
        tag: Tag,
        index: usize,
        field: String,
    },
    #[error("{tag} field {index} has unexpected value {value}")]
    OutOfRange { tag: Tag, index: usize, value: i64 },
    #[error("empty command")]
    EmptyCommand,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed command parameter {0:?}")]
    BadParam(String),
}

/// The last telemetry reported by the device.
///
/// Angles are in degrees (from the encoder), steps are microsteps (from the
/// driver) and velocities are whatever the firmware reports, which is rpm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Encoder angle, wrapped to one revolution.
    pub position: f64,
    pub absolute_position: f64,
    /// Driver microsteps, wrapped to one revolution.
    pub steps: i64,
    pub absolute_steps: i64,
    pub encoder_velocity: f64,
    pub driver_velocity: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrakeMethod {
    #[default]
    Free,
    Cool,
    Hard,
}

impl BrakeMethod {
    pub fn from_wire(value: i64) -> Option<BrakeMethod> {
        match value {
            0 => Some(BrakeMethod::Free),
            1 => Some(BrakeMethod::Cool),
            2 => Some(BrakeMethod::Hard),
            _ => None,
        }
    }

    pub fn wire(self) -> i64 {
        self as i64
    }

    /// The command that selects this brake method.
    pub fn command(self) -> Command {
        Command::SetBrake(self)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HomeDirection {
    #[default]
    Clockwise,
    CounterClockwise,
}

impl HomeDirection {
    // The firmware only ever sends 1 or -1, but older builds defaulted to 0.
    pub fn from_wire(value: i64) -> HomeDirection {
        if value < 0 {
            HomeDirection::CounterClockwise
        } else {
            HomeDirection::Clockwise
        }
    }

    pub fn wire(self) -> i64 {
        match self {
            HomeDirection::Clockwise => 1,
            HomeDirection::CounterClockwise => -1,
        }
    }
}

/// The motion configuration stored on the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Maximum velocity, in steps/s.
    pub velocity: f64,
    /// Maximum acceleration, in steps/s².
    pub acceleration: f64,
    pub brake_method: BrakeMethod,
    pub closed_loop_enabled: bool,
    /// Homing velocity, in rpm.
    pub home_velocity: f64,
    pub home_threshold: i32,
    pub home_direction: HomeDirection,
}

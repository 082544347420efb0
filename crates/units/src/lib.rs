//! Units used by the uStepper, and conversions between the device's native
//! units and the units that a person would rather look at.
//!
//! Everything on the wire is in native units: positions are counted in
//! microsteps and velocities/accelerations in (full) steps per second.
//! The display units (degrees, full steps, rpm) are only ever used for
//! showing values and for interpreting what the user typed.
//!
//! The one exception is the homing velocity, which the firmware takes in rpm.

use core::{fmt, str::FromStr};

use euclid::{Length, Scale};
use serde::{Deserialize, Serialize};

pub const FULL_STEPS_PER_REV: f64 = 200.0;
pub const MICROSTEPS_PER_STEP: f64 = 256.0;
pub const MICROSTEPS_PER_REV: i64 = 200 * 256;
pub const DEGREES_PER_REV: f64 = 360.0;

pub struct Microstep;
pub struct FullStep;
pub struct Degree;
pub struct StepsPerSec;
pub struct Rpm;

pub type Microsteps = Length<f64, Microstep>;
pub type FullSteps = Length<f64, FullStep>;
pub type Degrees = Length<f64, Degree>;
pub type StepRate = Length<f64, StepsPerSec>;
pub type RpmRate = Length<f64, Rpm>;

pub const RPM_TO_STEP_RATE: Scale<f64, Rpm, StepsPerSec> = Scale::new(FULL_STEPS_PER_REV / 60.0);
pub const STEP_RATE_TO_RPM: Scale<f64, StepsPerSec, Rpm> = Scale::new(60.0 / FULL_STEPS_PER_REV);

pub const DEGREES_TO_MICROSTEPS: Scale<f64, Degree, Microstep> =
    Scale::new(MICROSTEPS_PER_REV as f64 / DEGREES_PER_REV);
pub const MICROSTEPS_TO_DEGREES: Scale<f64, Microstep, Degree> =
    Scale::new(DEGREES_PER_REV / MICROSTEPS_PER_REV as f64);
pub const FULL_STEPS_TO_MICROSTEPS: Scale<f64, FullStep, Microstep> =
    Scale::new(MICROSTEPS_PER_STEP);
pub const MICROSTEPS_TO_FULL_STEPS: Scale<f64, Microstep, FullStep> =
    Scale::new(1.0 / MICROSTEPS_PER_STEP);
pub const DEGREES_TO_FULL_STEPS: Scale<f64, Degree, FullStep> =
    Scale::new(FULL_STEPS_PER_REV / DEGREES_PER_REV);

pub fn rpm_to_steps_per_sec(rpm: f64) -> f64 {
    (RpmRate::new(rpm) * RPM_TO_STEP_RATE).get()
}

pub fn steps_per_sec_to_rpm(steps_per_sec: f64) -> f64 {
    (StepRate::new(steps_per_sec) * STEP_RATE_TO_RPM).get()
}

/// Wraps an absolute microstep count to a single revolution.
///
/// This is a truncating remainder, so negative positions stay negative.
pub fn wrap_microsteps(steps: i64) -> i64 {
    steps % MICROSTEPS_PER_REV
}

/// Wraps an absolute angle (in degrees) to a single revolution.
pub fn wrap_degrees(angle: f64) -> f64 {
    angle % DEGREES_PER_REV
}

/// Rounds to the two decimals that the device uses when it echoes values.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionUnit {
    #[default]
    Degrees,
    Steps,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateUnit {
    #[default]
    Rpm,
    StepsPerSecond,
}

impl PositionUnit {
    /// Converts a user-entered distance into a whole number of microsteps.
    pub fn to_microsteps(self, amount: f64) -> i64 {
        let steps = match self {
            PositionUnit::Degrees => Degrees::new(amount) * DEGREES_TO_MICROSTEPS,
            PositionUnit::Steps => FullSteps::new(amount) * FULL_STEPS_TO_MICROSTEPS,
        };
        steps.get().round() as i64
    }

    /// Presents a driver microstep count.
    pub fn from_microsteps(self, steps: f64) -> f64 {
        let steps = Microsteps::new(steps);
        match self {
            PositionUnit::Degrees => (steps * MICROSTEPS_TO_DEGREES).get(),
            PositionUnit::Steps => (steps * MICROSTEPS_TO_FULL_STEPS).get(),
        }
    }

    /// Presents an encoder angle, which the device reports in degrees.
    pub fn from_degrees(self, angle: f64) -> f64 {
        match self {
            PositionUnit::Degrees => angle,
            PositionUnit::Steps => (Degrees::new(angle) * DEGREES_TO_FULL_STEPS).get(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PositionUnit::Degrees => "°",
            PositionUnit::Steps => "step",
        }
    }
}

impl RateUnit {
    /// Converts a user-entered velocity (or acceleration) into steps/s (or steps/s²).
    pub fn to_native(self, value: f64) -> f64 {
        match self {
            RateUnit::Rpm => rpm_to_steps_per_sec(value),
            RateUnit::StepsPerSecond => value,
        }
    }

    pub fn from_native(self, steps_per_sec: f64) -> f64 {
        match self {
            RateUnit::Rpm => steps_per_sec_to_rpm(steps_per_sec),
            RateUnit::StepsPerSecond => steps_per_sec,
        }
    }

    /// Converts a user-entered velocity into rpm.
    pub fn to_rpm(self, value: f64) -> f64 {
        match self {
            RateUnit::Rpm => value,
            RateUnit::StepsPerSecond => steps_per_sec_to_rpm(value),
        }
    }

    /// Presents a velocity that the device reports in rpm.
    pub fn from_rpm(self, rpm: f64) -> f64 {
        match self {
            RateUnit::Rpm => rpm,
            RateUnit::StepsPerSecond => rpm_to_steps_per_sec(rpm),
        }
    }

    pub fn velocity_label(self) -> &'static str {
        match self {
            RateUnit::Rpm => "rpm",
            RateUnit::StepsPerSecond => "step/s",
        }
    }

    pub fn acceleration_label(self) -> &'static str {
        match self {
            RateUnit::Rpm => "rpm/s",
            RateUnit::StepsPerSecond => "step/s^2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown unit {0:?}")]
pub struct UnknownUnit(pub String);

impl FromStr for PositionUnit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deg" | "degree" | "degrees" => Ok(PositionUnit::Degrees),
            "step" | "steps" => Ok(PositionUnit::Steps),
            _ => Err(UnknownUnit(s.to_owned())),
        }
    }
}

impl FromStr for RateUnit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpm" => Ok(RateUnit::Rpm),
            "step" | "steps" | "step/s" => Ok(RateUnit::StepsPerSecond),
            _ => Err(UnknownUnit(s.to_owned())),
        }
    }
}

impl fmt::Display for PositionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.velocity_label())
    }
}

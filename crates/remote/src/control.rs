//! The periodic control loop.
//!
//! Every tick does one of two things, alternately: tell the device how fast
//! the joystick wants it to go, or ask it for telemetry. Splitting them keeps
//! the device's command rate at one per tick.

use tokio::sync::watch;
use ustepper_protocol::Command;
use ustepper_units::round2;

/// A source of the live joystick position, as a fraction in `[-1, 1]`.
/// `None` means the joystick isn't being held.
pub trait InputRatio {
    fn ratio(&self) -> Option<f64>;
}

impl InputRatio for watch::Receiver<Option<f64>> {
    fn ratio(&self) -> Option<f64> {
        *self.borrow()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Motion,
    Telemetry,
}

#[derive(Debug)]
pub struct ControlLoop {
    phase: Phase,
    last_velocity: f64,
    telemetry_enabled: bool,
}

impl Default for ControlLoop {
    fn default() -> Self {
        ControlLoop {
            phase: Phase::Motion,
            last_velocity: 0.0,
            telemetry_enabled: true,
        }
    }
}

/// The continuous-motion velocity (steps/s) for a joystick ratio.
///
/// It's rounded the same way it will be encoded, so that comparing against
/// the last velocity compares what actually went on the wire.
pub fn joystick_velocity(ratio: Option<f64>, max_velocity: f64) -> f64 {
    let ratio = ratio.filter(|r| r.is_finite()).unwrap_or(0.0).clamp(-1.0, 1.0);
    let velocity = round2(ratio * max_velocity);
    // NaN never equals the last velocity, so it would be re-sent every tick.
    if velocity.is_finite() {
        velocity
    } else {
        0.0
    }
}

impl ControlLoop {
    /// Runs one tick, returning the command to send (if any).
    ///
    /// The caller is responsible for only ticking while the connection is
    /// open and the configuration is known; ticks that are skipped don't
    /// advance the phase.
    pub fn tick(&mut self, ratio: Option<f64>, max_velocity: f64) -> Option<Command> {
        match self.phase {
            Phase::Motion => {
                self.phase = Phase::Telemetry;
                let velocity = joystick_velocity(ratio, max_velocity);
                if velocity != self.last_velocity {
                    self.last_velocity = velocity;
                    Some(Command::Continuous { velocity })
                } else {
                    None
                }
            }
            Phase::Telemetry => {
                self.phase = Phase::Motion;
                self.telemetry_enabled.then_some(Command::RequestData)
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Stops telemetry polling until the device says it's `DONE`.
    pub fn suppress_telemetry(&mut self) {
        self.telemetry_enabled = false;
    }

    pub fn resume_telemetry(&mut self) {
        self.telemetry_enabled = true;
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry_enabled
    }
}

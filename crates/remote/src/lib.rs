//! A remote control for the uStepper motor controller.
//!
//! The device is driven over a single WebSocket. [`Session`] keeps track of
//! what the device last told us and turns what the user wants into commands;
//! [`Driver`] runs a session against a real connection (or a [`Simulator`]).

pub mod connection;
pub mod control;
pub mod driver;
mod error;
pub mod recording;
pub mod script;
pub mod session;
pub mod simulator;
pub mod ws;

pub use connection::{ConnectionStatus, LinkEvent, LinkId, LinkState, Transport};
pub use driver::{Driver, Request, Timing};
pub use error::{Error, Result, UploadRejection};
pub use recording::{PlaybackState, RecordingState};
pub use script::{ScriptClient, ScriptStore, UploadRequest};
pub use session::{Intent, Notification, Readout, ScriptLine, Session, Snapshot};
pub use simulator::Simulator;
pub use ws::WsTransport;

//! The client's view of the device.
//!
//! A [`Session`] owns the connection and everything we know about the device
//! on the other end of it. It is entirely synchronous: the driver feeds it
//! transport events and timer ticks, the user feeds it intents, and anyone
//! interested can [`subscribe`](Session::subscribe) to find out what changed.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use ustepper_protocol::{BrakeMethod, Command, DeviceConfig, Frame, HomeDirection, Telemetry};
use ustepper_units::{round2, PositionUnit, RateUnit};

use crate::{
    connection::{Connection, ConnectionStatus, LinkEvent, Transport},
    control::{ControlLoop, InputRatio},
    error::{Error, Result},
    recording::{RecordingSession, RecordingState},
};

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Connecting,
    Connected,
    ConnectionLost,
    /// The first configuration since the connection was (re)started.
    ConfigReceived(DeviceConfig),
    ConfigChanged(DeviceConfig),
    Telemetry(Telemetry),
    Line(usize),
    PlaybackEnded,
    RecordingChanged(RecordingState),
    ScriptChanged,
    Ack,
    Done,
}

/// Something the user wants the device to do.
///
/// Positions, velocities and accelerations are in the session's current
/// display units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Intent {
    SetVelocity(f64),
    SetAcceleration(f64),
    SetBrake(BrakeMethod),
    SetClosedLoop(bool),
    SetHomeVelocity(f64),
    SetHomeThreshold(i32),
    SetHomeDirection(HomeDirection),
    MoveBy(f64),
    MoveTo(f64),
    Brake,
    Home,
    EmergencyStop,
    ToggleRecording,
    AddLine,
    TogglePlay,
    StopRecording,
    SetPositionUnit(PositionUnit),
    SetRateUnit(RateUnit),
    Reconnect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptLine {
    pub text: String,
    pub active: bool,
}

/// Telemetry and configuration, converted to display units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Readout {
    pub encoder_position: f64,
    pub encoder_absolute: f64,
    pub driver_position: f64,
    pub driver_absolute: f64,
    pub encoder_velocity: f64,
    pub driver_velocity: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub home_velocity: f64,
}

/// A copy of the session's state at one moment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub telemetry: Telemetry,
    pub config: DeviceConfig,
    pub recording: RecordingState,
    pub telemetry_enabled: bool,
    pub commands_sent: u64,
    pub position_unit: PositionUnit,
    pub rate_unit: RateUnit,
}

impl Snapshot {
    pub fn readout(&self) -> Readout {
        let pos = self.position_unit;
        let rate = self.rate_unit;
        let tlm = &self.telemetry;
        Readout {
            encoder_position: round2(pos.from_degrees(tlm.position)),
            encoder_absolute: round2(pos.from_degrees(tlm.absolute_position)),
            driver_position: round2(pos.from_microsteps(tlm.steps as f64)),
            driver_absolute: round2(pos.from_microsteps(tlm.absolute_steps as f64)),
            encoder_velocity: round2(rate.from_rpm(tlm.encoder_velocity)),
            driver_velocity: round2(rate.from_rpm(tlm.driver_velocity)),
            velocity: round2(rate.from_native(self.config.velocity)),
            acceleration: round2(rate.from_native(self.config.acceleration)),
            home_velocity: round2(rate.from_rpm(self.config.home_velocity)),
        }
    }
}

/// Rejects NaN and infinities, which would otherwise go out as `0.00` while
/// the local copy kept the bad value.
fn finite(what: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::InvalidValue { what, value })
    }
}

pub struct Session<T, R> {
    conn: Connection<T>,
    control: ControlLoop,
    recording: RecordingSession,
    input: R,
    telemetry: Telemetry,
    config: DeviceConfig,
    position_unit: PositionUnit,
    rate_unit: RateUnit,
    script: Vec<String>,
    subscribers: Vec<mpsc::UnboundedSender<Notification>>,
}

impl<T: Transport, R: InputRatio> Session<T, R> {
    /// Creates a session and starts connecting.
    pub fn new(transport: T, input: R) -> Self {
        let mut ret = Session {
            conn: Connection::new(transport),
            control: ControlLoop::default(),
            recording: RecordingSession::default(),
            input,
            telemetry: Telemetry::default(),
            config: DeviceConfig::default(),
            position_unit: PositionUnit::default(),
            rate_unit: RateUnit::default(),
            script: Vec::new(),
            subscribers: Vec::new(),
        };
        ret.start_connecting();
        ret
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, n: Notification) {
        self.subscribers.retain(|tx| tx.send(n.clone()).is_ok());
    }

    fn start_connecting(&mut self) {
        self.conn.reinit();
        self.control.resume_telemetry();
        log::info!("Connecting");
        self.notify(Notification::Connecting);
    }

    fn send(&mut self, cmd: Command) -> Result<()> {
        self.conn.send(&cmd)
    }

    pub fn handle_link_event(&mut self, event: LinkEvent) -> Result<()> {
        if !self.conn.is_current(event.link()) {
            log::debug!("ignoring {event:?} from an old connection");
            return Ok(());
        }
        match event {
            LinkEvent::Opened(_) => {
                log::info!("Websocket connection established");
                self.notify(Notification::Connected);
                self.conn.handle_open()
            }
            LinkEvent::Closed(_) => {
                self.conn.handle_close();
                log::info!("Websocket connection lost");
                self.notify(Notification::ConnectionLost);
                Ok(())
            }
            LinkEvent::Frame(_, raw) => self.handle_frame(&raw),
        }
    }

    /// Applies one frame from the device. Frames that can't be parsed leave
    /// the state alone.
    pub fn handle_frame(&mut self, raw: &str) -> Result<()> {
        let frame = ustepper_protocol::parse(raw).map_err(|source| Error::MalformedFrame {
            raw: raw.to_owned(),
            source,
        })?;
        match frame {
            Frame::Ack => self.notify(Notification::Ack),
            Frame::Data(tlm) => {
                self.telemetry = tlm;
                self.notify(Notification::Telemetry(tlm));
            }
            Frame::Conf(config) => {
                self.config = config;
                if self.conn.mark_config_known() {
                    log::info!("Config received");
                    self.notify(Notification::ConfigReceived(config));
                }
                self.notify(Notification::ConfigChanged(config));
            }
            Frame::Done => {
                self.control.resume_telemetry();
                self.notify(Notification::Done);
            }
            Frame::Line(line) => {
                if self.recording.observe_line(line) {
                    self.notify(Notification::Line(line));
                }
            }
            Frame::End => {
                if self.recording.observe_end() {
                    self.notify(Notification::PlaybackEnded);
                    self.notify(Notification::RecordingChanged(self.recording.snapshot()));
                }
            }
            Frame::Unknown(raw) => return Err(Error::UnknownFrameTag(raw)),
        }
        Ok(())
    }

    /// The supervisor timer fired.
    pub fn supervise(&mut self) {
        if self.conn.supervise() {
            self.control.resume_telemetry();
            log::info!("Connecting");
            self.notify(Notification::Connecting);
        }
    }

    /// The control timer fired.
    pub fn control_tick(&mut self) -> Result<()> {
        if !self.conn.is_open() || !self.conn.status().config_known {
            return Ok(());
        }
        match self.control.tick(self.input.ratio(), self.config.velocity) {
            Some(cmd) => self.send(cmd),
            None => Ok(()),
        }
    }

    pub fn apply(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::SetVelocity(v) => self.set_velocity(v),
            Intent::SetAcceleration(a) => self.set_acceleration(a),
            Intent::SetBrake(b) => self.set_brake(b),
            Intent::SetClosedLoop(on) => self.set_closed_loop(on),
            Intent::SetHomeVelocity(v) => self.set_home_velocity(v),
            Intent::SetHomeThreshold(t) => {
                self.set_home_threshold(t);
                Ok(())
            }
            Intent::SetHomeDirection(d) => {
                self.set_home_direction(d);
                Ok(())
            }
            Intent::MoveBy(x) => self.move_by(x),
            Intent::MoveTo(x) => self.move_to(x),
            Intent::Brake => self.brake(),
            Intent::Home => self.home(),
            Intent::EmergencyStop => self.emergency_stop(),
            Intent::ToggleRecording => self.toggle_recording(),
            Intent::AddLine => self.add_line(),
            Intent::TogglePlay => self.toggle_play(),
            Intent::StopRecording => self.stop_recording(),
            Intent::SetPositionUnit(u) => {
                self.set_position_unit(u);
                Ok(())
            }
            Intent::SetRateUnit(u) => {
                self.set_rate_unit(u);
                Ok(())
            }
            Intent::Reconnect => {
                self.reconnect();
                Ok(())
            }
        }
    }

    pub fn set_velocity(&mut self, velocity: f64) -> Result<()> {
        let velocity = round2(self.rate_unit.to_native(finite("velocity", velocity)?));
        self.config.velocity = velocity;
        self.send(Command::SetSpeed { velocity })
    }

    pub fn set_acceleration(&mut self, acceleration: f64) -> Result<()> {
        let acceleration = round2(self.rate_unit.to_native(finite("acceleration", acceleration)?));
        self.config.acceleration = acceleration;
        self.send(Command::SetAccel { acceleration })
    }

    pub fn set_brake(&mut self, method: BrakeMethod) -> Result<()> {
        self.config.brake_method = method;
        self.send(method.command())
    }

    pub fn set_closed_loop(&mut self, enabled: bool) -> Result<()> {
        self.config.closed_loop_enabled = enabled;
        self.send(Command::SetClosedLoop(enabled))
    }

    // The homing parameters have no setter commands of their own; they go
    // along with the next HOME.

    pub fn set_home_velocity(&mut self, velocity: f64) -> Result<()> {
        let velocity = finite("home velocity", velocity)?;
        self.config.home_velocity = round2(self.rate_unit.to_rpm(velocity));
        Ok(())
    }

    pub fn set_home_threshold(&mut self, threshold: i32) {
        self.config.home_threshold = threshold;
    }

    pub fn set_home_direction(&mut self, direction: HomeDirection) {
        self.config.home_direction = direction;
    }

    /// Moves relative to the current position. Positive is clockwise.
    pub fn move_by(&mut self, amount: f64) -> Result<()> {
        let steps = self.position_unit.to_microsteps(finite("distance", amount)?);
        self.send(Command::Move { steps })
    }

    pub fn move_to(&mut self, position: f64) -> Result<()> {
        let steps = self.position_unit.to_microsteps(finite("position", position)?);
        self.send(Command::MoveTo { steps })
    }

    pub fn brake(&mut self) -> Result<()> {
        self.send(Command::Brake)
    }

    /// Starts homing. Telemetry polling stops until the device reports `DONE`.
    pub fn home(&mut self) -> Result<()> {
        let stopped = self.stop_recording();
        self.control.suppress_telemetry();
        self.send(Command::Home {
            velocity: self.config.home_velocity,
            threshold: self.config.home_threshold,
            direction: self.config.home_direction,
        })?;
        stopped
    }

    pub fn emergency_stop(&mut self) -> Result<()> {
        let stopped = self.stop_recording();
        self.send(Command::Stop)?;
        stopped
    }

    fn recording_transition(&mut self, cmd: Option<Command>) -> Result<()> {
        let Some(cmd) = cmd else {
            return Ok(());
        };
        self.notify(Notification::RecordingChanged(self.recording.snapshot()));
        self.send(cmd)
    }

    pub fn toggle_recording(&mut self) -> Result<()> {
        let cmd = self.recording.toggle_recording();
        if cmd == Some(Command::RecordStop) {
            self.control.resume_telemetry();
        }
        self.recording_transition(cmd)
    }

    pub fn add_line(&mut self) -> Result<()> {
        match self.recording.add_line() {
            Some(cmd) => self.send(cmd),
            None => Ok(()),
        }
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        let cmd = self.recording.toggle_play();
        self.recording_transition(cmd)
    }

    pub fn stop_recording(&mut self) -> Result<()> {
        let cmd = self.recording.stop();
        self.control.resume_telemetry();
        self.recording_transition(Some(cmd))
    }

    pub fn set_position_unit(&mut self, unit: PositionUnit) {
        self.position_unit = unit;
    }

    pub fn set_rate_unit(&mut self, unit: RateUnit) {
        self.rate_unit = unit;
    }

    /// Drops the current connection and starts a new one straight away,
    /// without waiting for the supervisor.
    pub fn reconnect(&mut self) {
        self.start_connecting();
    }

    /// Replaces the script fetched from the device's web server.
    pub fn set_script(&mut self, lines: Vec<String>) {
        if lines != self.script {
            self.script = lines;
            self.notify(Notification::ScriptChanged);
        }
    }

    /// The script, with the line being played back marked.
    pub fn script_view(&self) -> Vec<ScriptLine> {
        let rec = self.recording.snapshot();
        self.script
            .iter()
            .enumerate()
            .map(|(i, text)| ScriptLine {
                text: text.clone(),
                active: rec.is_playing && rec.current_line == i,
            })
            .collect()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.status()
    }

    pub fn recording(&self) -> RecordingState {
        self.recording.snapshot()
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.control.telemetry_enabled()
    }

    pub fn commands_sent(&self) -> u64 {
        self.conn.commands_sent()
    }

    pub fn position_unit(&self) -> PositionUnit {
        self.position_unit
    }

    pub fn rate_unit(&self) -> RateUnit {
        self.rate_unit
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status(),
            telemetry: self.telemetry,
            config: self.config,
            recording: self.recording(),
            telemetry_enabled: self.telemetry_enabled(),
            commands_sent: self.commands_sent(),
            position_unit: self.position_unit,
            rate_unit: self.rate_unit,
        }
    }

    pub fn transport(&self) -> &T {
        self.conn.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.conn.transport_mut()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;
    use crate::connection::{mock::MockTransport, LinkId, LinkState};

    const CONF: &str = "CONF P120.00 A50.00 B0 C1 V30.00 T5 D1";

    type TestSession = Session<MockTransport, watch::Receiver<Option<f64>>>;

    fn session() -> (TestSession, watch::Sender<Option<f64>>) {
        let (tx, rx) = watch::channel(None);
        (Session::new(MockTransport::default(), rx), tx)
    }

    fn link(s: &TestSession) -> LinkId {
        LinkId(s.transport().connects)
    }

    fn open(s: &mut TestSession) {
        s.transport_mut().open = true;
        s.handle_link_event(LinkEvent::Opened(link(s))).unwrap();
    }

    /// A session that's connected and has its configuration.
    fn ready() -> (TestSession, watch::Sender<Option<f64>>) {
        let (mut s, tx) = session();
        open(&mut s);
        s.handle_frame(CONF).unwrap();
        s.transport_mut().take_sent();
        (s, tx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut ret = Vec::new();
        while let Ok(n) = rx.try_recv() {
            ret.push(n);
        }
        ret
    }

    #[test]
    fn open_requests_config() {
        let (mut s, _tx) = session();
        let mut rx = s.subscribe();
        open(&mut s);
        assert_eq!(s.transport_mut().take_sent(), vec!["M16"]);
        assert_eq!(s.status().state, LinkState::Connected);
        assert!(!s.status().config_known);
        assert_eq!(drain(&mut rx), vec![Notification::Connected]);
    }

    #[test]
    fn first_config_is_announced_once() {
        let (mut s, _tx) = session();
        open(&mut s);
        let mut rx = s.subscribe();
        s.handle_frame(CONF).unwrap();
        s.handle_frame(CONF).unwrap();

        let config = *s.config();
        assert_eq!(config.velocity, 120.0);
        assert_eq!(config.home_threshold, 5);
        assert!(s.status().config_known);
        assert_eq!(
            drain(&mut rx),
            vec![
                Notification::ConfigReceived(config),
                Notification::ConfigChanged(config),
                Notification::ConfigChanged(config),
            ]
        );
    }

    #[test]
    fn control_loop_waits_for_config() {
        let (mut s, tx) = session();
        open(&mut s);
        s.transport_mut().take_sent();
        tx.send_replace(Some(0.5));
        for _ in 0..4 {
            s.control_tick().unwrap();
        }
        assert!(s.transport().sent.is_empty());

        s.handle_frame(CONF).unwrap();
        s.control_tick().unwrap();
        s.control_tick().unwrap();
        assert_eq!(s.transport_mut().take_sent(), vec!["G2 A60.00", "M15"]);
    }

    #[test]
    fn unchanged_ratio_sends_one_continuous() {
        let (mut s, tx) = ready();
        tx.send_replace(Some(-1.0));
        for _ in 0..6 {
            s.control_tick().unwrap();
        }
        let sent = s.transport_mut().take_sent();
        assert_eq!(sent.iter().filter(|t| t.starts_with("G2")).count(), 1);
        assert_eq!(sent[0], "G2 A-120.00");
    }

    #[test]
    fn nothing_after_close_until_config() {
        let (mut s, tx) = ready();
        tx.send_replace(Some(1.0));
        s.transport_mut().open = false;
        s.handle_link_event(LinkEvent::Closed(link(&s))).unwrap();
        assert!(!s.status().config_known);
        assert_eq!(s.status().state, LinkState::Disconnected);

        // Reconnected, but no configuration yet.
        s.supervise();
        open(&mut s);
        assert_eq!(s.transport_mut().take_sent(), vec!["M16"]);
        for _ in 0..4 {
            s.control_tick().unwrap();
        }
        s.supervise();
        assert_eq!(s.transport_mut().take_sent(), vec!["M16"]);

        s.handle_frame(CONF).unwrap();
        s.control_tick().unwrap();
        assert_eq!(s.transport_mut().take_sent(), vec!["G2 A120.00"]);
    }

    #[test]
    fn old_links_are_ignored() {
        let (mut s, _tx) = ready();
        let old = link(&s);
        s.reconnect();
        s.handle_link_event(LinkEvent::Closed(old)).unwrap();
        s.handle_link_event(LinkEvent::Frame(old, CONF.to_owned())).unwrap();
        assert_eq!(s.status().state, LinkState::Connecting);
        assert!(!s.status().config_known);
    }

    #[test]
    fn malformed_frames_keep_state() {
        let (mut s, _tx) = ready();
        s.handle_frame("DATA P10.00 S2560 E0.00 D0.00").unwrap();
        let before = *s.telemetry();

        let err = s.handle_frame("DATA P1.00 S2").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
        let err = s.handle_frame("CONF Pfast A1 B0 C1 V1 T1 D1").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
        assert_eq!(*s.telemetry(), before);
        assert_eq!(s.config().velocity, 120.0);
    }

    #[test]
    fn unknown_frames() {
        let (mut s, _tx) = ready();
        let mut rx = s.subscribe();
        let err = s.handle_frame("HELLO").unwrap_err();
        assert!(matches!(err, Error::UnknownFrameTag(ref raw) if raw == "HELLO"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn telemetry_overwrites() {
        let (mut s, _tx) = ready();
        s.handle_frame("DATA P10.00 S2560 E0.00 D0.00").unwrap();
        assert_eq!(s.telemetry().position, 10.0);
        assert_eq!(s.telemetry().steps, 2560);
        s.handle_frame("DATA P20.00 S-100 E1.00 D1.00").unwrap();
        assert_eq!(s.telemetry().position, 20.0);
        assert_eq!(s.telemetry().absolute_steps, -100);
    }

    #[test]
    fn home_blocks_telemetry_until_done() {
        let (mut s, _tx) = ready();
        s.home().unwrap();
        assert_eq!(s.transport_mut().take_sent(), vec!["M11", "G4 V30.00 T5 D1"]);
        assert!(!s.telemetry_enabled());

        for _ in 0..4 {
            s.control_tick().unwrap();
        }
        assert!(s.transport().sent.is_empty());

        s.handle_frame("DONE").unwrap();
        assert!(s.telemetry_enabled());
        s.control_tick().unwrap();
        s.control_tick().unwrap();
        assert_eq!(s.transport_mut().take_sent(), vec!["M15"]);
    }

    #[test]
    fn reconnect_resumes_telemetry() {
        let (mut s, _tx) = ready();
        s.home().unwrap();
        s.reconnect();
        assert!(s.telemetry_enabled());
    }

    #[test]
    fn emergency_stop() {
        let (mut s, _tx) = ready();
        s.toggle_play().unwrap();
        s.transport_mut().take_sent();
        s.emergency_stop().unwrap();
        assert_eq!(s.transport_mut().take_sent(), vec!["M11", "M0"]);
        assert!(!s.recording().is_playing);
    }

    #[test]
    fn sends_while_closed_are_dropped() {
        let (mut s, _tx) = session();
        let err = s.brake().unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));
        assert_eq!(s.commands_sent(), 0);
    }

    #[test]
    fn config_edits_are_optimistic() {
        let (mut s, _tx) = ready();
        s.set_velocity(60.0).unwrap();
        assert_eq!(s.config().velocity, 200.0);
        s.set_rate_unit(RateUnit::StepsPerSecond);
        s.set_acceleration(1000.0).unwrap();
        assert_eq!(s.config().acceleration, 1000.0);
        s.set_brake(BrakeMethod::Hard).unwrap();
        s.set_closed_loop(false).unwrap();
        assert_eq!(
            s.transport_mut().take_sent(),
            vec!["M1 A200.00", "M2 A1000.00", "M5", "M7"]
        );

        // The device has the final word.
        s.handle_frame(CONF).unwrap();
        assert_eq!(s.config().velocity, 120.0);
        assert_eq!(s.config().brake_method, BrakeMethod::Free);
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let (mut s, tx) = ready();
        let before = *s.config();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(s.set_velocity(bad), Err(Error::InvalidValue { what: "velocity", .. })));
            assert!(matches!(s.set_acceleration(bad), Err(Error::InvalidValue { .. })));
            assert!(matches!(s.set_home_velocity(bad), Err(Error::InvalidValue { .. })));
            assert!(matches!(s.move_by(bad), Err(Error::InvalidValue { .. })));
            assert!(matches!(s.apply(Intent::MoveTo(bad)), Err(Error::InvalidValue { .. })));
        }
        assert_eq!(*s.config(), before);
        assert!(s.transport().sent.is_empty());

        // The control loop still sends a steady joystick only once.
        tx.send_replace(Some(0.5));
        for _ in 0..6 {
            s.control_tick().unwrap();
        }
        assert_eq!(s.transport_mut().take_sent(), vec!["G2 A60.00", "M15", "M15", "M15"]);
    }

    #[test]
    fn homing_parameters_are_local() {
        let (mut s, _tx) = ready();
        s.set_rate_unit(RateUnit::StepsPerSecond);
        s.set_home_velocity(200.0).unwrap();
        s.set_home_threshold(8);
        s.set_home_direction(HomeDirection::CounterClockwise);
        assert!(s.transport().sent.is_empty());
        s.home().unwrap();
        assert_eq!(s.transport_mut().take_sent(), vec!["M11", "G4 V60.00 T8 D-1"]);
    }

    #[test]
    fn moves_in_display_units() {
        let (mut s, _tx) = ready();
        s.move_by(90.0).unwrap();
        s.move_by(-1.0).unwrap();
        s.set_position_unit(PositionUnit::Steps);
        s.move_by(-1.5).unwrap();
        s.move_to(200.0).unwrap();
        assert_eq!(
            s.transport_mut().take_sent(),
            vec!["G0 A12800", "G0 A-142", "G0 A-384", "G1 A51200"]
        );
    }

    #[test]
    fn playback_tracks_lines() {
        let (mut s, _tx) = ready();
        let mut rx = s.subscribe();
        s.handle_frame("LINE 7").unwrap();
        assert_eq!(s.recording().current_line, 0);

        s.apply(Intent::TogglePlay).unwrap();
        assert_eq!(s.transport_mut().take_sent(), vec!["M13"]);
        s.handle_frame("LINE 7").unwrap();
        assert_eq!(s.recording().current_line, 7);

        s.handle_frame("END").unwrap();
        assert!(!s.recording().is_playing);
        let notes = drain(&mut rx);
        assert!(notes.contains(&Notification::Line(7)));
        assert!(notes.contains(&Notification::PlaybackEnded));
    }

    #[test]
    fn recording_stop_resumes_telemetry() {
        let (mut s, _tx) = ready();
        s.apply(Intent::ToggleRecording).unwrap();
        s.apply(Intent::AddLine).unwrap();
        s.control.suppress_telemetry();
        s.apply(Intent::ToggleRecording).unwrap();
        assert!(s.telemetry_enabled());
        assert_eq!(s.transport_mut().take_sent(), vec!["M10", "M12", "M11"]);
    }

    #[test]
    fn script_view_marks_playing_line() {
        let (mut s, _tx) = ready();
        let mut rx = s.subscribe();
        s.set_script(vec!["G1 A0".to_owned(), "G1 A3200".to_owned()]);
        s.set_script(vec!["G1 A0".to_owned(), "G1 A3200".to_owned()]);
        assert_eq!(drain(&mut rx), vec![Notification::ScriptChanged]);
        assert!(s.script_view().iter().all(|l| !l.active));

        s.toggle_play().unwrap();
        s.handle_frame("LINE 1").unwrap();
        let view = s.script_view();
        assert!(!view[0].active);
        assert_eq!(
            view[1],
            ScriptLine {
                text: "G1 A3200".to_owned(),
                active: true
            }
        );
    }

    #[test]
    fn readout_units() {
        let (mut s, _tx) = ready();
        s.handle_frame("DATA P90.00 S12800 E60.00 D30.00").unwrap();
        let r = s.snapshot().readout();
        assert_eq!(r.encoder_position, 90.0);
        assert_eq!(r.driver_position, 90.0);
        assert_eq!(r.encoder_velocity, 60.0);
        assert_eq!(r.velocity, 36.0);

        s.set_position_unit(PositionUnit::Steps);
        s.set_rate_unit(RateUnit::StepsPerSecond);
        let r = s.snapshot().readout();
        assert_eq!(r.encoder_position, 50.0);
        assert_eq!(r.driver_position, 50.0);
        assert_eq!(r.encoder_velocity, 200.0);
        assert_eq!(r.velocity, 120.0);
        assert_eq!(r.home_velocity, 100.0);
    }
}

//! A pretend uStepper, for trying things out without hardware.
//!
//! It speaks the device's side of the protocol well enough to exercise the
//! whole client: it acknowledges commands, reports its configuration and
//! telemetry, and plays back what it recorded one line per telemetry request.

use tokio::sync::mpsc;
use ustepper_protocol::{
    command::split, BrakeMethod, Command, CommandId, DeviceConfig, HomeDirection, Telemetry,
};
use ustepper_units::{
    steps_per_sec_to_rpm, wrap_degrees, wrap_microsteps, DEGREES_PER_REV, MICROSTEPS_PER_REV,
    MICROSTEPS_PER_STEP,
};

use crate::connection::{LinkEvent, LinkId, Transport};

/// How much simulated time passes between telemetry requests. The client
/// asks every other control tick.
const DATA_PERIOD_SECS: f64 = 0.2;

#[derive(Debug)]
pub struct Device {
    pub config: DeviceConfig,
    /// Microsteps.
    pub position: f64,
    /// Steps/s.
    pub velocity: f64,
    pub recording: Vec<String>,
    recording_active: bool,
    playing: bool,
    next_line: usize,
}

impl Default for Device {
    fn default() -> Self {
        Device {
            config: DeviceConfig {
                velocity: 100.0,
                acceleration: 1000.0,
                brake_method: BrakeMethod::Free,
                closed_loop_enabled: true,
                home_velocity: 30.0,
                home_threshold: 4,
                home_direction: HomeDirection::Clockwise,
            },
            position: 0.0,
            velocity: 0.0,
            recording: Vec::new(),
            recording_active: false,
            playing: false,
            next_line: 0,
        }
    }
}

impl Device {
    fn telemetry(&self) -> Telemetry {
        let absolute_steps = self.position.round() as i64;
        let absolute_position = self.position / MICROSTEPS_PER_REV as f64 * DEGREES_PER_REV;
        let rpm = steps_per_sec_to_rpm(self.velocity);
        Telemetry {
            position: wrap_degrees(absolute_position),
            absolute_position,
            steps: wrap_microsteps(absolute_steps),
            absolute_steps,
            encoder_velocity: rpm,
            driver_velocity: rpm,
        }
    }

    /// Handles one command token, returning the frames it answers with.
    pub fn handle(&mut self, token: &str) -> Vec<String> {
        let (id, params) = match split(token) {
            Ok(x) => x,
            Err(e) => {
                log::warn!("simulator: {e}");
                return Vec::new();
            }
        };
        let arg = |letter: char| {
            params
                .iter()
                .find(|(l, _)| *l == letter)
                .map_or(0.0, |(_, v)| *v)
        };

        let mut replies = Vec::new();
        match id {
            CommandId::Move => self.position += arg('A'),
            CommandId::MoveTo => self.position = arg('A'),
            CommandId::Continuous => self.velocity = arg('A'),
            CommandId::Brake | CommandId::Stop => {
                self.velocity = 0.0;
                self.playing = false;
            }
            CommandId::Home => {
                self.velocity = 0.0;
                self.position = 0.0;
                return vec!["DONE".to_owned()];
            }
            CommandId::SetSpeed => self.config.velocity = arg('A'),
            CommandId::SetAccel => self.config.acceleration = arg('A'),
            CommandId::SetBrakeFree => self.config.brake_method = BrakeMethod::Free,
            CommandId::SetBrakeCool => self.config.brake_method = BrakeMethod::Cool,
            CommandId::SetBrakeHard => self.config.brake_method = BrakeMethod::Hard,
            CommandId::SetClosedLoopEnable => self.config.closed_loop_enabled = true,
            CommandId::SetClosedLoopDisable => self.config.closed_loop_enabled = false,
            CommandId::RecordStart => {
                self.recording.clear();
                self.recording_active = true;
                self.playing = false;
            }
            CommandId::RecordStop => {
                self.recording_active = false;
                self.playing = false;
                self.next_line = 0;
            }
            CommandId::RecordAdd => {
                if self.recording_active {
                    let steps = self.position.round() as i64;
                    self.recording.push(Command::MoveTo { steps }.encode());
                }
            }
            CommandId::RecordPlay => {
                self.recording_active = false;
                self.playing = true;
            }
            CommandId::RecordPause => self.playing = false,
            CommandId::RequestData => {
                self.advance(&mut replies);
                replies.push(self.telemetry().to_frame());
                return replies;
            }
            CommandId::RequestConfig => return vec![self.config.to_frame()],
        }
        replies.push("OK".to_owned());
        replies
    }

    fn advance(&mut self, replies: &mut Vec<String>) {
        self.position += self.velocity * DATA_PERIOD_SECS * MICROSTEPS_PER_STEP;
        if !self.playing {
            return;
        }
        match self.recording.get(self.next_line) {
            Some(line) => {
                if let Ok((CommandId::MoveTo, params)) = split(line) {
                    if let Some((_, steps)) = params.first() {
                        self.position = *steps;
                    }
                }
                replies.push(format!("LINE {}", self.next_line));
                self.next_line += 1;
            }
            None => {
                self.playing = false;
                self.next_line = 0;
                replies.push("END".to_owned());
            }
        }
    }
}

pub struct Simulator {
    events: mpsc::UnboundedSender<LinkEvent>,
    next_id: u64,
    link: Option<LinkId>,
    pub device: Device,
}

impl Simulator {
    pub fn new(events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Simulator {
            events,
            next_id: 0,
            link: None,
            device: Device::default(),
        }
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            log::debug!("simulator: nobody is listening");
        }
    }

    /// Drops the connection from the device's end, as if it had rebooted.
    pub fn drop_link(&mut self) {
        if let Some(id) = self.link.take() {
            self.emit(LinkEvent::Closed(id));
        }
    }
}

impl Transport for Simulator {
    fn connect(&mut self) -> LinkId {
        self.next_id += 1;
        let id = LinkId(self.next_id);
        self.link = Some(id);
        self.emit(LinkEvent::Opened(id));
        id
    }

    fn close(&mut self) {
        self.link = None;
    }

    fn is_open(&self) -> bool {
        self.link.is_some()
    }

    fn send(&mut self, frame: &str) -> anyhow::Result<()> {
        let id = self
            .link
            .ok_or_else(|| anyhow::anyhow!("simulator is not connected"))?;
        for reply in self.device.handle(frame) {
            self.emit(LinkEvent::Frame(id, reply));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ustepper_protocol::{parse, Frame};

    use super::*;

    fn frames(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<String> {
        let mut ret = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let LinkEvent::Frame(_, f) = ev {
                ret.push(f);
            }
        }
        ret
    }

    #[test]
    fn answers_config_request() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sim = Simulator::new(tx);
        let id = sim.connect();
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::Opened(id));

        sim.send("M16").unwrap();
        let replies = frames(&mut rx);
        assert_eq!(replies.len(), 1);
        assert_eq!(parse(&replies[0]).unwrap(), Frame::Conf(sim.device.config));
    }

    #[test]
    fn refuses_to_send_when_closed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sim = Simulator::new(tx);
        assert!(sim.send("M15").is_err());
        sim.connect();
        sim.close();
        assert!(!sim.is_open());
    }

    #[test]
    fn continuous_motion() {
        let mut dev = Device::default();
        assert_eq!(dev.handle("G2 A100.00"), vec!["OK"]);
        let replies = dev.handle("M15");
        let Ok(Frame::Data(tlm)) = parse(&replies[0]) else {
            panic!("expected telemetry, got {replies:?}");
        };
        // 100 steps/s for 0.2 s.
        assert_eq!(tlm.absolute_steps, 20 * 256);
        assert_eq!(tlm.driver_velocity, 30.0);
    }

    #[test]
    fn home_is_done() {
        let mut dev = Device::default();
        dev.handle("G0 A3200");
        assert_eq!(dev.handle("G4 V30.00 T4 D1"), vec!["DONE"]);
        assert_eq!(dev.position, 0.0);
    }

    #[test]
    fn record_and_play() {
        let mut dev = Device::default();
        dev.handle("M10");
        dev.handle("G0 A3200");
        dev.handle("M12");
        dev.handle("G0 A3200");
        dev.handle("M12");
        dev.handle("M11");
        assert_eq!(dev.recording, vec!["G1 A3200", "G1 A6400"]);

        dev.handle("G1 A0");
        dev.handle("M13");
        let all: Vec<_> = (0..3).flat_map(|_| dev.handle("M15")).collect();
        assert_eq!(all[0], "LINE 0");
        assert_eq!(all[2], "LINE 1");
        assert_eq!(all[4], "END");
        assert_eq!(dev.position, 6400.0);
    }

    #[test]
    fn garbage_is_ignored() {
        let mut dev = Device::default();
        assert!(dev.handle("X9 hello").is_empty());
    }
}

use core::fmt;

use serde::{Deserialize, Serialize};
use ustepper_units::{wrap_degrees, wrap_microsteps};

use crate::{BrakeMethod, DeviceConfig, HomeDirection, ParseError, Telemetry};

/// The tags that the device puts in its frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Ok,
    Data,
    Conf,
    Done,
    Line,
    End,
}

impl Tag {
    /// Tags are matched as substrings anywhere in the frame, and they aren't
    /// prefix-free ("DONE" can show up in a frame that also says "OK"), so the
    /// first one in this list wins.
    pub const PRIORITY: [Tag; 6] = [Tag::Ok, Tag::Data, Tag::Conf, Tag::Done, Tag::Line, Tag::End];

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Ok => "OK",
            Tag::Data => "DATA",
            Tag::Conf => "CONF",
            Tag::Done => "DONE",
            Tag::Line => "LINE",
            Tag::End => "END",
        }
    }

    pub fn classify(raw: &str) -> Option<Tag> {
        Tag::PRIORITY.into_iter().find(|tag| raw.contains(tag.as_str()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// The last command was accepted.
    Ack,
    Data(Telemetry),
    Conf(DeviceConfig),
    /// A blocking operation (like homing) finished.
    Done,
    /// Playback is now executing this (zero-based) line of the recording.
    Line(usize),
    /// Playback reached the end of the recording.
    End,
    Unknown(String),
}

/// Parses a frame received from the device.
///
/// Unknown frames are not an error, but frames with a known tag and too few
/// (or unreadable) fields are.
pub fn parse(raw: &str) -> Result<Frame, ParseError> {
    let Some(tag) = Tag::classify(raw) else {
        return Ok(Frame::Unknown(raw.to_owned()));
    };
    match tag {
        Tag::Ok => Ok(Frame::Ack),
        Tag::Data => parse_data(raw).map(Frame::Data),
        Tag::Conf => parse_conf(raw).map(Frame::Conf),
        Tag::Done => Ok(Frame::Done),
        Tag::Line => parse_line(raw).map(Frame::Line),
        Tag::End => Ok(Frame::End),
    }
}

/// The fields of a `DATA` or `CONF` frame, with the tag dropped and the
/// one-letter prefix stripped off each field.
///
/// The fields are positional: the letters are not checked, because the
/// firmware always sends them in the same order.
struct Fields<'a> {
    tag: Tag,
    values: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(tag: Tag, raw: &'a str, expected: usize, prefixed: bool) -> Result<Self, ParseError> {
        let values: Vec<&str> = raw
            .split_whitespace()
            .skip(1)
            .map(|item| {
                if prefixed {
                    item.char_indices().nth(1).map_or("", |(i, _)| &item[i..])
                } else {
                    item
                }
            })
            .collect();
        if values.len() < expected {
            return Err(ParseError::MissingField {
                tag,
                expected,
                found: values.len(),
            });
        }
        Ok(Fields { tag, values })
    }

    fn bad(&self, index: usize) -> ParseError {
        ParseError::BadNumber {
            tag: self.tag,
            index,
            field: self.values[index].to_owned(),
        }
    }

    fn float(&self, index: usize) -> Result<f64, ParseError> {
        self.values[index]
            .parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .ok_or_else(|| self.bad(index))
    }

    // The firmware sometimes formats counts with decimals; they get truncated.
    fn int(&self, index: usize) -> Result<i64, ParseError> {
        let s = self.values[index];
        s.parse::<i64>()
            .ok()
            .or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|x| x.is_finite())
                    .map(|x| x.trunc() as i64)
            })
            .ok_or_else(|| self.bad(index))
    }
}

fn parse_data(raw: &str) -> Result<Telemetry, ParseError> {
    let f = Fields::new(Tag::Data, raw, 4, true)?;
    let absolute_position = f.float(0)?;
    let absolute_steps = f.int(1)?;
    Ok(Telemetry {
        position: wrap_degrees(absolute_position),
        absolute_position,
        steps: wrap_microsteps(absolute_steps),
        absolute_steps,
        encoder_velocity: f.float(2)?,
        driver_velocity: f.float(3)?,
    })
}

fn parse_conf(raw: &str) -> Result<DeviceConfig, ParseError> {
    let f = Fields::new(Tag::Conf, raw, 7, true)?;
    let brake = f.int(2)?;
    let brake_method = BrakeMethod::from_wire(brake).ok_or(ParseError::OutOfRange {
        tag: Tag::Conf,
        index: 2,
        value: brake,
    })?;
    let threshold = f.int(5)?;
    let home_threshold = i32::try_from(threshold).map_err(|_| ParseError::OutOfRange {
        tag: Tag::Conf,
        index: 5,
        value: threshold,
    })?;
    Ok(DeviceConfig {
        velocity: f.float(0)?,
        acceleration: f.float(1)?,
        brake_method,
        closed_loop_enabled: f.int(3)? != 0,
        home_velocity: f.float(4)?,
        home_threshold,
        home_direction: HomeDirection::from_wire(f.int(6)?),
    })
}

fn parse_line(raw: &str) -> Result<usize, ParseError> {
    let f = Fields::new(Tag::Line, raw, 1, false)?;
    let index = f.int(0)?;
    usize::try_from(index).map_err(|_| ParseError::OutOfRange {
        tag: Tag::Line,
        index: 0,
        value: index,
    })
}

impl Telemetry {
    /// The `DATA` frame that the device would send for this telemetry.
    pub fn to_frame(&self) -> String {
        format!(
            "DATA P{:.2} S{} E{:.2} D{:.2}",
            self.absolute_position, self.absolute_steps, self.encoder_velocity, self.driver_velocity
        )
    }
}

impl DeviceConfig {
    /// The `CONF` frame that the device would send for this configuration.
    pub fn to_frame(&self) -> String {
        format!(
            "CONF P{:.2} A{:.2} B{} C{} V{:.2} T{} D{}",
            self.velocity,
            self.acceleration,
            self.brake_method.wire(),
            u8::from(self.closed_loop_enabled),
            self.home_velocity,
            self.home_threshold,
            self.home_direction.wire(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ustepper_units::round2;

    #[test]
    fn data_frame() {
        let Frame::Data(tlm) = parse("DATA P10.00 S2560 E0.00 D0.00").unwrap() else {
            panic!("not a data frame");
        };
        assert_eq!(tlm.position, 10.0);
        assert_eq!(tlm.absolute_position, 10.0);
        assert_eq!(tlm.steps, 2560 % (200 * 256));
        assert_eq!(tlm.absolute_steps, 2560);
        assert_eq!(tlm.encoder_velocity, 0.0);
        assert_eq!(tlm.driver_velocity, 0.0);
    }

    #[test]
    fn data_frame_wraps() {
        let Frame::Data(tlm) = parse("DATA P370.50 S52000 E1.50 D-2.25").unwrap() else {
            panic!("not a data frame");
        };
        assert!((tlm.position - 10.5).abs() < 1e-9);
        assert_eq!(tlm.absolute_position, 370.5);
        assert_eq!(tlm.steps, 800);
        assert_eq!(tlm.absolute_steps, 52000);
        assert_eq!(tlm.driver_velocity, -2.25);
    }

    #[test]
    fn conf_frame() {
        let frame = parse("CONF P120.00 A50.00 B0 C1 V30.00 T5 D1").unwrap();
        assert_eq!(
            frame,
            Frame::Conf(DeviceConfig {
                velocity: 120.0,
                acceleration: 50.0,
                brake_method: BrakeMethod::Free,
                closed_loop_enabled: true,
                home_velocity: 30.0,
                home_threshold: 5,
                home_direction: HomeDirection::Clockwise,
            })
        );
    }

    #[test]
    fn short_frames_are_malformed() {
        assert_eq!(
            parse("DATA P10.00 S2560"),
            Err(ParseError::MissingField {
                tag: Tag::Data,
                expected: 4,
                found: 2
            })
        );
        assert!(matches!(
            parse("CONF P120.00 A50.00 B0 C1 V30.00 T5"),
            Err(ParseError::MissingField { tag: Tag::Conf, .. })
        ));
        assert!(matches!(parse("LINE"), Err(ParseError::MissingField { .. })));
    }

    #[test]
    fn bad_fields_are_malformed() {
        assert_eq!(
            parse("DATA Pabc S2560 E0.00 D0.00"),
            Err(ParseError::BadNumber {
                tag: Tag::Data,
                index: 0,
                field: "abc".to_owned()
            })
        );
        // A bare prefix letter with no number.
        assert!(matches!(
            parse("DATA P S2560 E0.00 D0.00"),
            Err(ParseError::BadNumber { index: 0, .. })
        ));
        assert!(matches!(
            parse("CONF P120.00 A50.00 B7 C1 V30.00 T5 D1"),
            Err(ParseError::OutOfRange { index: 2, value: 7, .. })
        ));
        assert!(matches!(parse("LINE -3"), Err(ParseError::OutOfRange { .. })));
    }

    #[test]
    fn counts_with_decimals_are_truncated() {
        let Frame::Conf(conf) = parse("CONF P1.00 A2.00 B2 C0 V3.00 T5.70 D-1").unwrap() else {
            panic!("not a conf frame");
        };
        assert_eq!(conf.home_threshold, 5);
        assert_eq!(conf.brake_method, BrakeMethod::Hard);
        assert!(!conf.closed_loop_enabled);
        assert_eq!(conf.home_direction, HomeDirection::CounterClockwise);
    }

    #[test]
    fn fields_are_positional() {
        // The letters don't matter, only the order.
        let Frame::Data(tlm) = parse("DATA X1.00 Y2 Z3.00 W4.00").unwrap() else {
            panic!("not a data frame");
        };
        assert_eq!(tlm.absolute_position, 1.0);
        assert_eq!(tlm.absolute_steps, 2);
        assert_eq!(tlm.encoder_velocity, 3.0);
        assert_eq!(tlm.driver_velocity, 4.0);
    }

    #[test]
    fn simple_frames() {
        assert_eq!(parse("OK"), Ok(Frame::Ack));
        assert_eq!(parse("DONE"), Ok(Frame::Done));
        assert_eq!(parse("LINE 7"), Ok(Frame::Line(7)));
        assert_eq!(parse("END"), Ok(Frame::End));
        assert_eq!(parse("hello"), Ok(Frame::Unknown("hello".to_owned())));
        assert_eq!(parse(""), Ok(Frame::Unknown(String::new())));
    }

    // The order is OK, DATA, CONF, DONE, LINE, END; the first tag found anywhere wins.
    #[test]
    fn tag_priority() {
        assert_eq!(
            Tag::PRIORITY,
            [Tag::Ok, Tag::Data, Tag::Conf, Tag::Done, Tag::Line, Tag::End]
        );
        assert_eq!(parse("DONE OK"), Ok(Frame::Ack));
        assert_eq!(parse("OK DONE"), Ok(Frame::Ack));
        assert_eq!(parse("LINE 3 DONE"), Ok(Frame::Done));
        assert_eq!(parse("LINE 2 END"), Ok(Frame::Line(2)));
        assert_eq!(Tag::classify("CONF END"), Some(Tag::Conf));
        assert_eq!(Tag::classify("SENDING"), Some(Tag::End));
    }

    proptest! {
        // The device-side encoders are what the simulator sends, so they must read back.
        #[test]
        fn conf_frames_read_back(
            velocity in 0.0..10_000.0f64,
            acceleration in 0.0..10_000.0f64,
            brake in 0i64..3,
            closed_loop in any::<bool>(),
            home_velocity in 0.0..500.0f64,
            home_threshold in 0i32..100,
            ccw in any::<bool>(),
        ) {
            let conf = DeviceConfig {
                velocity: round2(velocity),
                acceleration: round2(acceleration),
                brake_method: BrakeMethod::from_wire(brake).unwrap(),
                closed_loop_enabled: closed_loop,
                home_velocity: round2(home_velocity),
                home_threshold,
                home_direction: if ccw { HomeDirection::CounterClockwise } else { HomeDirection::Clockwise },
            };
            let parsed = parse(&conf.to_frame()).unwrap();
            let Frame::Conf(parsed) = parsed else {
                panic!("not a conf frame");
            };
            prop_assert_eq!(parsed.brake_method, conf.brake_method);
            prop_assert_eq!(parsed.home_direction, conf.home_direction);
            prop_assert!((parsed.velocity - conf.velocity).abs() < 1e-6);
            prop_assert!((parsed.home_velocity - conf.home_velocity).abs() < 1e-6);
        }

        #[test]
        fn data_steps_are_wrapped(steps in -10_000_000i64..10_000_000) {
            let tlm = Telemetry { absolute_steps: steps, ..Default::default() };
            let Frame::Data(parsed) = parse(&tlm.to_frame()).unwrap() else {
                panic!("not a data frame");
            };
            prop_assert_eq!(parsed.absolute_steps, steps);
            prop_assert_eq!(parsed.steps, steps % (200 * 256));
        }
    }
}

//! Recording and playback of motion sequences.
//!
//! The device does the actual recording; this just tracks what we asked it
//! to do, plus the two things it tells us during playback (which line it's
//! on, and when it reaches the end). Each transition returns the command that
//! has to be sent for it.

use serde::{Deserialize, Serialize};
use ustepper_protocol::Command;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    Recording,
    Playing,
    Paused,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingState {
    pub is_recording: bool,
    pub is_playing: bool,
    pub current_line: usize,
}

#[derive(Debug, Default)]
pub struct RecordingSession {
    state: PlaybackState,
    current_line: usize,
}

impl RecordingSession {
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn snapshot(&self) -> RecordingState {
        RecordingState {
            is_recording: self.state == PlaybackState::Recording,
            is_playing: self.state == PlaybackState::Playing,
            current_line: self.current_line,
        }
    }

    pub fn start_recording(&mut self) -> Option<Command> {
        match self.state {
            PlaybackState::Idle => {
                self.state = PlaybackState::Recording;
                Some(Command::RecordStart)
            }
            s => {
                log::warn!("can't start recording while {s:?}");
                None
            }
        }
    }

    pub fn toggle_recording(&mut self) -> Option<Command> {
        if self.state == PlaybackState::Recording {
            Some(self.stop())
        } else {
            self.start_recording()
        }
    }

    /// Appends the device's current state to the recording.
    pub fn add_line(&mut self) -> Option<Command> {
        if self.state == PlaybackState::Recording {
            Some(Command::RecordAdd)
        } else {
            log::warn!("can't add a line while {:?}", self.state);
            None
        }
    }

    pub fn play(&mut self) -> Option<Command> {
        match self.state {
            PlaybackState::Idle | PlaybackState::Recording => {
                self.current_line = 0;
                self.state = PlaybackState::Playing;
                Some(Command::RecordPlay)
            }
            PlaybackState::Paused => {
                self.state = PlaybackState::Playing;
                Some(Command::RecordPlay)
            }
            PlaybackState::Playing => None,
        }
    }

    pub fn pause(&mut self) -> Option<Command> {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            Some(Command::RecordPause)
        } else {
            None
        }
    }

    pub fn toggle_play(&mut self) -> Option<Command> {
        if self.state == PlaybackState::Playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Stops whatever is going on. This always sends `RECORD_STOP`, even when
    /// we think we're idle, since the device may disagree.
    pub fn stop(&mut self) -> Command {
        self.state = PlaybackState::Idle;
        Command::RecordStop
    }

    /// The device reported the line it's executing. Ignored unless playing.
    pub fn observe_line(&mut self, line: usize) -> bool {
        if self.state == PlaybackState::Playing {
            self.current_line = line;
            true
        } else {
            false
        }
    }

    /// The device reached the end of the recording.
    pub fn observe_end(&mut self) -> bool {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Idle;
            true
        } else {
            false
        }
    }
}

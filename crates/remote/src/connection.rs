//! The lifecycle of the single control connection.
//!
//! The connection goes `Connecting -> Connected -> Disconnected -> Connecting`
//! forever. Nothing here reconnects on its own when the link drops: the
//! supervisor timer notices and calls [`Connection::supervise`].

use serde::{Deserialize, Serialize};
use ustepper_protocol::Command;

use crate::error::{Error, Result};

/// Identifies one connection attempt, so that events from an attempt that
/// has since been replaced can be ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Opened(LinkId),
    Closed(LinkId),
    Frame(LinkId, String),
}

impl LinkEvent {
    pub fn link(&self) -> LinkId {
        match self {
            LinkEvent::Opened(id) | LinkEvent::Closed(id) | LinkEvent::Frame(id, _) => *id,
        }
    }
}

/// Something that can carry text frames to the device.
///
/// Connecting is asynchronous: `connect` only starts an attempt, and the
/// transport reports what happens to it as [`LinkEvent`]s tagged with the
/// returned id.
pub trait Transport {
    /// Starts a new connection attempt, closing any previous one.
    fn connect(&mut self) -> LinkId;
    fn close(&mut self);
    fn is_open(&self) -> bool;
    fn send(&mut self, frame: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: LinkState,
    /// Whether a `CONF` frame has arrived since the connection was (re)started.
    pub config_known: bool,
}

pub struct Connection<T> {
    transport: T,
    status: ConnectionStatus,
    link: Option<LinkId>,
    commands_sent: u64,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Connection {
            transport,
            status: ConnectionStatus::default(),
            link: None,
            commands_sent: 0,
        }
    }

    /// Drops the current connection (if any) and starts a new one.
    pub fn reinit(&mut self) {
        self.transport.close();
        self.link = Some(self.transport.connect());
        self.status = ConnectionStatus {
            state: LinkState::Connecting,
            config_known: false,
        };
    }

    pub fn is_current(&self, link: LinkId) -> bool {
        self.link == Some(link)
    }

    /// The transport opened: ask for the configuration straight away.
    pub fn handle_open(&mut self) -> Result<()> {
        self.status.state = LinkState::Connected;
        self.send(&Command::RequestConfig)
    }

    pub fn handle_close(&mut self) {
        self.status = ConnectionStatus {
            state: LinkState::Disconnected,
            config_known: false,
        };
    }

    /// Records that a `CONF` frame arrived. Returns true if it was the first
    /// one on this connection.
    pub fn mark_config_known(&mut self) -> bool {
        !std::mem::replace(&mut self.status.config_known, true)
    }

    /// The supervisor's periodic check. Returns true if the connection was restarted.
    pub fn supervise(&mut self) -> bool {
        let restarted = !self.transport.is_open();
        if restarted {
            self.reinit();
        }
        // Asking again is harmless; the device just answers with another CONF.
        if !self.status.config_known && self.transport.is_open() {
            if let Err(e) = self.send(&Command::RequestConfig) {
                log::warn!("{e}");
            }
        }
        restarted
    }

    /// Sends a command if the transport is open. Commands are never buffered:
    /// if we aren't connected, the command is lost.
    pub fn send(&mut self, cmd: &Command) -> Result<()> {
        let token = cmd.encode();
        if !self.transport.is_open() {
            log::warn!("Not connected, dropping {token:?}");
            return Err(Error::TransportUnavailable(token));
        }
        log::debug!("Sending: {token}");
        self.transport.send(&token).map_err(Error::Transport)?;
        self.commands_sent += 1;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

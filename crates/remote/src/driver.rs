//! Runs a [`Session`] on the tokio runtime.
//!
//! The session itself never waits for anything. The driver owns the three
//! timers, the stream of transport events and the queue of user requests,
//! and hands each of them to the session one at a time, in the order they
//! arrive.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot},
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

use crate::{
    connection::{LinkEvent, Transport},
    control::InputRatio,
    error::Error,
    script::{ScriptClient, ScriptStore, UploadRequest},
    session::{Intent, ScriptLine, Session, Snapshot},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    /// How often to check that the connection is alive.
    pub supervisor: Duration,
    pub control: Duration,
    pub script_poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            supervisor: Duration::from_secs(3),
            control: Duration::from_millis(100),
            script_poll: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
pub enum Request {
    Intent(Intent),
    Upload(UploadRequest),
    Snapshot(oneshot::Sender<Snapshot>),
    Script(oneshot::Sender<Vec<ScriptLine>>),
    Quit,
}

enum Background {
    Script(anyhow::Result<Vec<String>>),
    Uploaded(anyhow::Result<()>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fetch {
    Idle,
    Running,
    /// Running, but the script changed since it started, so its result
    /// gets thrown away and the fetch is repeated.
    Stale,
}

pub struct Driver<T, R, S = ScriptClient> {
    session: Session<T, R>,
    links: mpsc::UnboundedReceiver<LinkEvent>,
    requests: mpsc::Receiver<Request>,
    scripts: Option<Arc<S>>,
    background_tx: mpsc::UnboundedSender<Background>,
    background_rx: mpsc::UnboundedReceiver<Background>,
    fetch: Fetch,
    timing: Timing,
}

fn timer(period: Duration) -> Interval {
    // The first tick of a plain `interval` is immediate; none of ours should be.
    let mut ret = interval_at(Instant::now() + period, period);
    ret.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ret
}

fn report(res: crate::Result<()>) {
    match res {
        Ok(()) => {}
        // Already logged by the connection.
        Err(Error::TransportUnavailable(_)) => {}
        Err(e) => log::warn!("{e}"),
    }
}

impl<T, R, S> Driver<T, R, S>
where
    T: Transport + Send + 'static,
    R: InputRatio + Send + 'static,
    S: ScriptStore,
{
    /// `links` must be the receiving end of the channel that the session's
    /// transport reports to. Without a script client, the recorded script is
    /// never fetched and uploads are refused.
    pub fn new(
        session: Session<T, R>,
        links: mpsc::UnboundedReceiver<LinkEvent>,
        requests: mpsc::Receiver<Request>,
        scripts: Option<S>,
        timing: Timing,
    ) -> Self {
        let (background_tx, background_rx) = mpsc::unbounded_channel();
        Driver {
            session,
            links,
            requests,
            scripts: scripts.map(Arc::new),
            background_tx,
            background_rx,
            fetch: Fetch::Idle,
            timing,
        }
    }

    /// Runs until asked to quit (or until every request sender is gone), and
    /// then hands back the session.
    pub async fn run(mut self) -> Session<T, R> {
        let mut supervisor = timer(self.timing.supervisor);
        let mut control = timer(self.timing.control);
        let mut script_poll = timer(self.timing.script_poll);
        let polling = self.scripts.is_some();

        loop {
            tokio::select! {
                _ = supervisor.tick() => self.session.supervise(),
                _ = control.tick() => report(self.session.control_tick()),
                _ = script_poll.tick(), if polling => self.poll_script(),
                Some(event) = self.links.recv() => report(self.session.handle_link_event(event)),
                Some(bg) = self.background_rx.recv() => self.handle_background(bg),
                req = self.requests.recv() => match req {
                    Some(Request::Quit) | None => break,
                    Some(req) => self.handle_request(req),
                },
            }
        }
        self.session
    }

    fn handle_request(&mut self, req: Request) {
        match req {
            Request::Intent(intent) => {
                report(self.session.apply(intent));
                if intent == Intent::AddLine {
                    self.refresh_script();
                }
            }
            Request::Upload(upload) => self.upload(upload),
            Request::Snapshot(tx) => {
                let _ = tx.send(self.session.snapshot());
            }
            Request::Script(tx) => {
                let _ = tx.send(self.session.script_view());
            }
            Request::Quit => {}
        }
    }

    fn handle_background(&mut self, bg: Background) {
        match bg {
            Background::Script(res) => {
                let stale = self.fetch == Fetch::Stale;
                self.fetch = Fetch::Idle;
                if stale {
                    self.poll_script();
                    return;
                }
                match res {
                    Ok(lines) => self.session.set_script(lines),
                    // This fails every time while the device is away, so keep it quiet.
                    Err(e) => log::debug!("fetching script: {e}"),
                }
            }
            Background::Uploaded(Ok(())) => {
                log::info!("Upload complete");
                self.refresh_script();
            }
            Background::Uploaded(Err(e)) => log::warn!("upload failed: {e}"),
        }
    }

    /// Starts fetching the script, unless a fetch is already running.
    fn poll_script(&mut self) {
        let Some(client) = self.scripts.clone() else {
            return;
        };
        if self.fetch != Fetch::Idle {
            return;
        }
        self.fetch = Fetch::Running;
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Background::Script(client.fetch().await));
        });
    }

    /// Fetches the script because we know it changed. A fetch that is
    /// already running might have the old version, so it gets redone.
    fn refresh_script(&mut self) {
        if self.fetch == Fetch::Running {
            self.fetch = Fetch::Stale;
        } else {
            self.poll_script();
        }
    }

    fn upload(&mut self, upload: UploadRequest) {
        let Some(client) = self.scripts.clone() else {
            log::warn!("no file server, not uploading");
            return;
        };
        log::info!("Uploading {} bytes", upload.len());
        let tx = self.background_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Background::Uploaded(client.upload(upload).await));
        });
    }
}

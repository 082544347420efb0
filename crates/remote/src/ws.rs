//! The real transport: a WebSocket to the device.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_tungstenite::tungstenite::Message;
use futures::{SinkExt as _, StreamExt as _};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::connection::{LinkEvent, LinkId, Transport};

struct Link {
    outgoing: mpsc::UnboundedSender<String>,
    open: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Each connection attempt runs in its own task, which reports back through
/// `events`. Must be used from within a tokio runtime.
pub struct WsTransport {
    url: String,
    events: mpsc::UnboundedSender<LinkEvent>,
    next_id: u64,
    link: Option<Link>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        WsTransport {
            url: url.into(),
            events,
            next_id: 0,
            link: None,
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self) -> LinkId {
        self.close();
        self.next_id += 1;
        let id = LinkId(self.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_link(
            id,
            self.url.clone(),
            rx,
            open.clone(),
            self.events.clone(),
        ));
        self.link = Some(Link {
            outgoing: tx,
            open,
            task,
        });
        id
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.open.store(false, Ordering::SeqCst);
            link.task.abort();
        }
    }

    fn is_open(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| l.open.load(Ordering::SeqCst))
    }

    fn send(&mut self, frame: &str) -> anyhow::Result<()> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no connection"))?;
        link.outgoing
            .send(frame.to_owned())
            .map_err(|_| anyhow::anyhow!("connection task exited"))
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_link(
    id: LinkId,
    url: String,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    open: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    if let Err(e) = pump(id, &url, &mut outgoing, &open, &events).await {
        log::warn!("{url}: {e}");
    }
    open.store(false, Ordering::SeqCst);
    // The session may be gone already, in which case nobody cares.
    let _ = events.send(LinkEvent::Closed(id));
}

async fn pump(
    id: LinkId,
    url: &str,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    open: &AtomicBool,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> anyhow::Result<()> {
    let (stream, _response) = async_tungstenite::tokio::connect_async(url).await?;
    let (mut sink, mut stream) = stream.split();
    open.store(true, Ordering::SeqCst);
    events.send(LinkEvent::Opened(id))?;

    loop {
        tokio::select! {
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                sink.send(Message::text(frame)).await?;
            }
            msg = stream.next() => {
                match msg.transpose()? {
                    Some(Message::Text(text)) => {
                        events.send(LinkEvent::Frame(id, text.as_str().to_owned()))?;
                    }
                    Some(Message::Close(_)) | None => break,
                    Some(other) => log::debug!("ignoring non-text message {other:?}"),
                }
            }
        }
    }
    Ok(())
}

//! Transport bridge: WebSocket listener plus the channel-backed transport
//! handed to sessions.

pub mod websocket;

use shellmux_core::{MuxError, MuxResult, ServerEvent, Transport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// A transport that queues events for one connection's write loop.
pub struct ChannelTransport {
    id: u64,
    tx: mpsc::UnboundedSender<ServerEvent>,
    attached: AtomicBool,
}

impl ChannelTransport {
    /// Create a transport and the receiver its connection drains.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            attached: AtomicBool::new(true),
        });
        (transport, rx)
    }

    /// Accept events again after a `detach`, before beginning a new session.
    pub fn reattach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    /// Queue an event regardless of attachment, for connection-level replies
    /// (shutdown notices, decode errors).
    pub fn send_direct(&self, event: ServerEvent) -> MuxResult<()> {
        self.tx
            .send(event)
            .map_err(|_| MuxError::Transport("connection closed".into()))
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, event: ServerEvent) -> MuxResult<()> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(MuxError::Transport(format!("transport {} detached", self.id)));
        }
        self.send_direct(event)
    }

    fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.attached.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

//! Transport capability consumed by the session layer.
//!
//! A transport is one connected peer. Sessions hold at most one of them and
//! push events through it; the connection lifecycle itself lives elsewhere.

use crate::error::MuxResult;
use crate::events::ServerEvent;

/// A handle to one connected peer.
pub trait Transport: Send + Sync {
    /// Process-unique identifier of this transport.
    fn id(&self) -> u64;

    /// Queue an event for delivery to the peer.
    ///
    /// Fails once the transport is detached or the peer has gone away.
    fn send(&self, event: ServerEvent) -> MuxResult<()>;

    /// Stop accepting events: the transport no longer represents its session.
    fn detach(&self);

    /// Whether the peer is still reachable and attached.
    fn is_connected(&self) -> bool;
}

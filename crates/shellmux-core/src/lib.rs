//! shellmux-core: Shared protocol library for shellmux.
//!
//! Provides the inbound/outbound event types, the JSON/CBOR frame codec,
//! the error taxonomy, and the transport capability trait.

pub mod codec;
pub mod error;
pub mod events;
pub mod transport;

// Re-export commonly used items at crate root.
pub use codec::{decode_client_event, encode_server_event, Encoding};
pub use error::{MuxError, MuxResult};
pub use events::{ClientEvent, ServerEvent, TerminalInfo, DEFAULT_COLS, DEFAULT_ROWS};
pub use transport::Transport;

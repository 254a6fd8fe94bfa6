//! Frame codec for the shellmux event stream.
//!
//! Text frames carry JSON, binary frames carry CBOR. Both encode the same
//! `{ event, payload }` shape.

use crate::error::MuxResult;
use crate::events::{ClientEvent, ServerEvent};
use std::io::Cursor;

/// Wire encoding of a single frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Json,
    Cbor,
}

/// Encode a serializable value with the given encoding.
pub fn encode<T: serde::Serialize>(encoding: Encoding, value: &T) -> MuxResult<Vec<u8>> {
    match encoding {
        Encoding::Json => Ok(serde_json::to_vec(value)?),
        Encoding::Cbor => {
            let mut payload = Vec::new();
            ciborium::into_writer(value, &mut payload)?;
            Ok(payload)
        }
    }
}

/// Decode a frame payload into a typed value.
pub fn decode<T: serde::de::DeserializeOwned>(encoding: Encoding, data: &[u8]) -> MuxResult<T> {
    match encoding {
        Encoding::Json => Ok(serde_json::from_slice(data)?),
        Encoding::Cbor => {
            let value: T = ciborium::from_reader(Cursor::new(data))?;
            Ok(value)
        }
    }
}

/// Decode one inbound client frame.
pub fn decode_client_event(encoding: Encoding, data: &[u8]) -> MuxResult<ClientEvent> {
    decode(encoding, data)
}

/// Encode one outbound server frame.
pub fn encode_server_event(encoding: Encoding, event: &ServerEvent) -> MuxResult<Vec<u8>> {
    encode(encoding, event)
}

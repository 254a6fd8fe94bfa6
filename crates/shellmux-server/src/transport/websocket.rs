//! WebSocket listener using tokio-tungstenite.
//!
//! Text messages carry JSON frames and binary messages carry CBOR frames;
//! both decode to the same event types.

use futures_util::{SinkExt, StreamExt};
use shellmux_core::{Encoding, MuxError, MuxResult};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Maximum inbound frame size (1 MiB).
const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Start the WebSocket listener.
///
/// Returns the bound address and a receiver that yields accepted connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> MuxResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| MuxError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

/// Send one encoded frame, as text for JSON and binary for CBOR.
pub async fn ws_send_frame(
    ws: &mut WebSocketStream<TcpStream>,
    encoding: Encoding,
    frame: Vec<u8>,
) -> MuxResult<()> {
    let message = match encoding {
        Encoding::Json => {
            let text = String::from_utf8(frame)
                .map_err(|e| MuxError::Codec(format!("JSON frame is not UTF-8: {e}")))?;
            Message::Text(text.into())
        }
        Encoding::Cbor => Message::Binary(frame.into()),
    };
    ws.send(message)
        .await
        .map_err(|e| MuxError::Transport(format!("WS send failed: {e}")))
}

/// Receive the next data frame and the encoding it arrived in.
///
/// Returns `None` once the connection is closed. Pings are answered inline.
pub async fn ws_recv_frame(
    ws: &mut WebSocketStream<TcpStream>,
) -> MuxResult<Option<(Encoding, Vec<u8>)>> {
    loop {
        let (encoding, data) = match ws.next().await {
            Some(Ok(Message::Text(text))) => (Encoding::Json, text.as_bytes().to_vec()),
            Some(Ok(Message::Binary(data))) => (Encoding::Cbor, data.to_vec()),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
                continue;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(MuxError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        };

        if data.len() > MAX_WS_FRAME_SIZE {
            return Err(MuxError::InvalidMessage(format!(
                "WS frame too large: {} bytes (max {})",
                data.len(),
                MAX_WS_FRAME_SIZE
            )));
        }
        return Ok(Some((encoding, data)));
    }
}

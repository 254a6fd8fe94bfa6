//! Core server: accepts connections and routes their events to sessions.
//!
//! Owns the session registry and the reaper. Each connection gets one
//! `ChannelTransport`; the connection loop writes whatever the session layer
//! queues on it and feeds inbound frames to `dispatch`.

use crate::config::ServerConfig;
use crate::session::{spawn_reaper, ProcessSpawner, SessionRegistry};
use crate::transport::websocket::{self, WebSocketConnection};
use crate::transport::ChannelTransport;
use shellmux_core::events::{SessionEndedPayload, ShutdownPayload};
use shellmux_core::{
    decode_client_event, encode_server_event, ClientEvent, Encoding, MuxError, MuxResult,
    ServerEvent, Transport,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long shutdown waits for connections to deliver the shutdown notice.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Per-connection state threaded through the event loop.
struct ConnectionContext {
    transport: Arc<ChannelTransport>,
    /// Session this connection began or resumed, if still attached.
    session_id: Option<String>,
}

impl ConnectionContext {
    fn new(transport: Arc<ChannelTransport>) -> Self {
        Self {
            transport,
            session_id: None,
        }
    }

    /// The attached session, forgetting it if another connection took over.
    fn active_session(&mut self) -> Option<String> {
        if self.session_id.is_some() && !self.transport.is_connected() {
            if let Some(lost) = self.session_id.take() {
                debug!(session_id = %lost, transport = self.transport.id(), "connection no longer attached");
            }
        }
        self.session_id.clone()
    }

    /// Reply on this connection even when no session is attached.
    fn reply(&self, event: ServerEvent) {
        if let Err(e) = self.transport.send_direct(event) {
            debug!(transport = self.transport.id(), error = %e, "reply undelivered");
        }
    }
}

/// The shellmux server instance.
pub struct ShellServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl ShellServer {
    /// Create a new server instance.
    pub fn new(config: ServerConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let registry = Arc::new(SessionRegistry::new(spawner, config.registry_settings()));
        Self {
            config,
            registry,
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    /// Accept WebSocket connections until the listener stops.
    pub async fn run(self: Arc<Self>) -> MuxResult<()> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let (local_addr, mut ws_rx) = websocket::start_listener(addr).await?;

        let reaper = spawn_reaper(
            self.registry.clone(),
            Duration::from_secs(self.config.reap_interval.max(1)),
        );

        info!(
            addr = %local_addr,
            shell = %self.config.shell,
            cwd = %self.config.working_directory.display(),
            "shellmux-server ready"
        );

        while let Some(conn) = ws_rx.recv().await {
            let srv = self.clone();
            tokio::spawn(async move {
                if let Err(e) = srv.handle_websocket(conn).await {
                    warn!(error = %e, "WebSocket connection error");
                }
            });
        }

        info!("listener closed, shutting down");
        reaper.abort();
        Ok(())
    }

    /// Notify connected clients, then kill every session.
    ///
    /// Each connection drops its shutdown receiver once the notice is
    /// written, so the receiver count tells when every client has it.
    pub async fn shutdown(&self) {
        let connections = self.shutdown_tx.send(()).unwrap_or(0);
        info!(connections, "broadcasting shutdown to connected clients");

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.shutdown_tx.receiver_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let pending = self.shutdown_tx.receiver_count();
        if pending > 0 {
            warn!(pending, "connections did not acknowledge shutdown in time");
        }

        self.registry.shutdown_all().await;
    }

    async fn handle_websocket(&self, mut conn: WebSocketConnection) -> MuxResult<()> {
        let remote = conn.remote_addr;
        let (transport, mut outbound_rx) = ChannelTransport::new();
        let mut ctx = ConnectionContext::new(transport);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        // Replies follow the encoding of the most recent inbound frame.
        let mut encoding = Encoding::default();

        info!(remote = %remote, transport = ctx.transport.id(), "client connected");

        let result = loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let notice = ServerEvent::Shutdown(ShutdownPayload {
                        reason: "server shutdown".into(),
                    });
                    if let Ok(frame) = encode_server_event(encoding, &notice) {
                        let _ = websocket::ws_send_frame(&mut conn.ws_stream, encoding, frame).await;
                    }
                    break Ok(());
                }

                Some(event) = outbound_rx.recv() => {
                    let frame = match encode_server_event(encoding, &event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(event = event.name(), error = %e, "failed to encode event");
                            continue;
                        }
                    };
                    if let Err(e) = websocket::ws_send_frame(&mut conn.ws_stream, encoding, frame).await {
                        break Err(e);
                    }
                }

                frame = websocket::ws_recv_frame(&mut conn.ws_stream) => {
                    match frame {
                        Ok(Some((frame_encoding, data))) => {
                            encoding = frame_encoding;
                            match decode_client_event(frame_encoding, &data) {
                                Ok(event) => self.dispatch(event, &mut ctx).await,
                                Err(e) => {
                                    warn!(remote = %remote, error = %e, "dropping malformed frame");
                                    ctx.reply(ServerEvent::error(format!("malformed event: {e}")));
                                }
                            }
                        }
                        Ok(None) => {
                            debug!(remote = %remote, "WebSocket closed by peer");
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };
        drop(shutdown_rx);

        if let Some(session_id) = ctx.session_id.take() {
            self.registry.detach(&session_id, ctx.transport.id()).await;
        }
        ctx.transport.detach();
        info!(remote = %remote, transport = ctx.transport.id(), "client disconnected");
        result
    }

    /// Route one inbound event.
    ///
    /// Events that expect a reply report failures back; the rest drop
    /// silently when they address something unknown.
    async fn dispatch(&self, event: ClientEvent, ctx: &mut ConnectionContext) {
        debug!(event = event.name(), transport = ctx.transport.id(), "inbound event");

        match event {
            ClientEvent::BeginSession(p) => {
                if let Some(current) = ctx.session_id.take() {
                    if p.session_id.as_deref() != Some(current.as_str()) {
                        self.registry.detach(&current, ctx.transport.id()).await;
                    }
                }
                ctx.transport.reattach();
                match self
                    .registry
                    .begin_or_resume(p.session_id.as_deref(), ctx.transport.clone())
                    .await
                {
                    Ok(outcome) => {
                        debug!(
                            session_id = %outcome.session_id,
                            is_new = outcome.is_new,
                            terminals = outcome.terminals.len(),
                            transport = ctx.transport.id(),
                            "connection bound to session"
                        );
                        ctx.session_id = Some(outcome.session_id);
                    }
                    Err(e) => {
                        warn!(error = %e, "begin-session failed");
                        ctx.reply(ServerEvent::error(e.to_string()));
                    }
                }
            }

            ClientEvent::EndSession(_) => match ctx.active_session() {
                Some(session_id) => {
                    self.registry.remove(&session_id).await;
                    ctx.session_id = None;
                    ctx.reply(ServerEvent::SessionEnded(SessionEndedPayload { session_id }));
                }
                None => ctx.reply(ServerEvent::error(MuxError::NoSession.to_string())),
            },

            ClientEvent::CreateTerminal(p) => {
                let Some(session_id) = ctx.active_session() else {
                    ctx.reply(ServerEvent::terminal_error(MuxError::NoSession.to_string()));
                    return;
                };
                if let Err(e) = self
                    .registry
                    .create_terminal(&session_id, ctx.transport.as_ref(), p)
                    .await
                {
                    warn!(session_id = %session_id, error = %e, "terminal creation failed");
                    ctx.reply(ServerEvent::terminal_error(e.to_string()));
                }
            }

            ClientEvent::TerminalInput(p) => {
                let Some(session_id) = ctx.active_session() else {
                    return;
                };
                match self
                    .registry
                    .write_input(&session_id, &p.terminal_id, p.data.as_bytes())
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => debug!(terminal_id = %p.terminal_id, "input for unknown terminal ignored"),
                    Err(e) => warn!(session_id = %session_id, terminal_id = %p.terminal_id, error = %e, "terminal write failed"),
                }
            }

            ClientEvent::ResizeTerminal(p) => {
                let Some(session_id) = ctx.active_session() else {
                    return;
                };
                match self
                    .registry
                    .resize_terminal(&session_id, &p.terminal_id, p.cols, p.rows)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => debug!(terminal_id = %p.terminal_id, "resize for unknown terminal ignored"),
                    Err(e) => warn!(session_id = %session_id, terminal_id = %p.terminal_id, error = %e, "terminal resize failed"),
                }
            }

            ClientEvent::CloseTerminal(p) => {
                let Some(session_id) = ctx.active_session() else {
                    return;
                };
                if !self.registry.close_terminal(&session_id, &p.terminal_id).await {
                    debug!(terminal_id = %p.terminal_id, "close for unknown terminal ignored");
                }
            }

            ClientEvent::RenameTerminal(p) => {
                let Some(session_id) = ctx.active_session() else {
                    return;
                };
                if !self
                    .registry
                    .rename_terminal(&session_id, &p.terminal_id, p.custom_name)
                    .await
                {
                    debug!(terminal_id = %p.terminal_id, "rename for unknown terminal ignored");
                }
            }
        }
    }
}

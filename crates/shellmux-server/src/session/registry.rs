//! Session lifecycle management.
//!
//! Tracks every live session, handles creation, reattachment, detachment,
//! terminal routing and expiry. Each session sits behind its own lock, so
//! unrelated sessions never serialize on each other; the table lock is only
//! held to find, insert or remove entries.

use super::process::{ProcessEvent, ProcessSpawner, SpawnRequest};
use super::terminal::{TerminalHandle, TerminalRegistry};
use shellmux_core::events::{
    CreateTerminalPayload, SessionCreatedPayload, SessionResumedPayload,
    SessionSupersededPayload, TerminalDataPayload, TerminalExitPayload, TerminalReadyPayload,
};
use shellmux_core::{
    MuxError, MuxResult, ServerEvent, TerminalInfo, Transport, DEFAULT_COLS, DEFAULT_ROWS,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Tunables applied to every session and terminal.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub shell: String,
    pub working_directory: PathBuf,
    pub env: HashMap<String, String>,
    /// Ring buffer capacity per terminal, in bytes.
    pub buffer_size: usize,
    /// How long a detached session survives without activity.
    pub idle_timeout: Duration,
    pub max_sessions: usize,
    pub max_terminals_per_session: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".into(),
            working_directory: PathBuf::from("/"),
            env: HashMap::new(),
            buffer_size: 256 * 1024,
            idle_timeout: Duration::from_secs(3600),
            max_sessions: 100,
            max_terminals_per_session: 16,
        }
    }
}

/// One logical client across reconnects.
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// The one transport currently receiving this session's events.
    transport: Option<Arc<dyn Transport>>,
    terminals: TerminalRegistry,
    pub created_at: Instant,
    /// Last inbound event or outbound data.
    pub last_activity: Instant,
    /// Set once removed from the registry; late lock holders treat the session as gone.
    closed: bool,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport: None,
            terminals: TerminalRegistry::new(),
            created_at: now,
            last_activity: now,
            closed: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.transport.is_some()
    }

    /// Id of the attached transport, if any.
    pub fn attached_transport_id(&self) -> Option<u64> {
        self.transport.as_ref().map(|t| t.id())
    }

    pub fn terminals(&self) -> &TerminalRegistry {
        &self.terminals
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn inventory(&self) -> Vec<TerminalInfo> {
        self.terminals.iter().map(TerminalHandle::info).collect()
    }

    /// Install `transport`, superseding whatever was attached, then deliver
    /// the inventory and each terminal's buffered output.
    fn reattach(&mut self, transport: Arc<dyn Transport>) -> MuxResult<()> {
        if let Some(previous) = self.transport.take() {
            if previous.id() != transport.id() {
                let notice = ServerEvent::SessionSuperseded(SessionSupersededPayload {
                    reason: "session opened from another connection".into(),
                });
                if let Err(e) = previous.send(notice) {
                    debug!(session_id = %self.id, error = %e, "superseded transport already gone");
                }
                previous.detach();
                info!(
                    session_id = %self.id,
                    old_transport = previous.id(),
                    new_transport = transport.id(),
                    "attachment superseded"
                );
            }
        }

        transport.send(ServerEvent::SessionResumed(SessionResumedPayload {
            session_id: self.id.clone(),
            terminals: self.inventory(),
        }))?;

        for terminal in self.terminals.iter_mut() {
            if terminal.buffered_len() == 0 {
                continue;
            }
            let replay = ServerEvent::TerminalBuffered(TerminalDataPayload {
                terminal_id: terminal.id.clone(),
                data: String::from_utf8_lossy(&terminal.buffered()).into_owned(),
            });
            match transport.send(replay) {
                Ok(()) => terminal.clear_buffer(),
                Err(e) => {
                    warn!(session_id = %self.id, terminal_id = %terminal.id, error = %e, "replay failed, keeping buffer");
                }
            }
        }

        self.transport = Some(transport);
        self.touch();
        Ok(())
    }

    /// Forward output live, or retain it when nobody can receive it.
    fn handle_output(&mut self, terminal_id: &str, chunk: Vec<u8>) {
        let Some(terminal) = self.terminals.get_mut(terminal_id) else {
            debug!(session_id = %self.id, terminal_id, "output for closed terminal dropped");
            return;
        };
        let now = Instant::now();
        terminal.last_activity = now;

        // Only delivered output counts as session activity: a detached
        // session running `top` must still expire.
        if let Some(transport) = &self.transport {
            let event = ServerEvent::TerminalData(TerminalDataPayload {
                terminal_id: terminal_id.to_string(),
                data: String::from_utf8_lossy(&chunk).into_owned(),
            });
            match transport.send(event) {
                Ok(()) => {
                    self.last_activity = now;
                    return;
                }
                Err(e) => {
                    debug!(session_id = %self.id, terminal_id, error = %e, "live delivery failed, buffering");
                }
            }
        }

        terminal.buffer_output(chunk);
    }

    /// Drop the handle and tell the attached transport, if there is one.
    fn handle_exit(&mut self, terminal_id: &str, exit_code: i32) {
        let removed = self.terminals.remove(terminal_id).is_some();
        info!(session_id = %self.id, terminal_id, exit_code, removed, "terminal process exited");

        match &self.transport {
            Some(transport) => {
                let event = ServerEvent::TerminalExit(TerminalExitPayload {
                    terminal_id: terminal_id.to_string(),
                    exit_code,
                });
                if let Err(e) = transport.send(event) {
                    debug!(session_id = %self.id, terminal_id, error = %e, "exit notification undelivered");
                }
            }
            None => {
                debug!(session_id = %self.id, terminal_id, "no transport attached, exit notification dropped");
            }
        }
    }

    /// Mark closed and kill every terminal.
    fn teardown(&mut self) {
        self.closed = true;
        self.transport = None;
        for mut terminal in self.terminals.drain() {
            terminal.terminate();
        }
    }
}

/// Result of `begin_or_resume`.
#[derive(Debug, Clone, PartialEq)]
pub struct BeginOutcome {
    pub session_id: String,
    pub is_new: bool,
    pub terminals: Vec<TerminalInfo>,
}

/// Information returned when listing sessions.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub terminal_count: usize,
    /// Output retained for replay across all terminals.
    pub buffered_bytes: usize,
    pub attached: bool,
    pub idle_secs: u64,
    pub created_secs: u64,
}

/// Process-wide table of sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    spawner: Arc<dyn ProcessSpawner>,
    settings: RegistrySettings,
}

impl SessionRegistry {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, settings: RegistrySettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            spawner,
            settings,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    async fn get(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Resume `requested` if it names a live session, otherwise mint a new one.
    ///
    /// On resume the previous attachment (if any) is sent `session-superseded`
    /// and detached before `session-resumed` and the replay go to `transport`.
    pub async fn begin_or_resume(
        &self,
        requested: Option<&str>,
        transport: Arc<dyn Transport>,
    ) -> MuxResult<BeginOutcome> {
        if let Some(id) = requested {
            if let Some(entry) = self.get(id).await {
                let mut session = entry.lock().await;
                if !session.closed {
                    session.reattach(transport.clone())?;
                    info!(
                        session_id = %session.id,
                        transport = transport.id(),
                        terminals = session.terminals.len(),
                        "session resumed"
                    );
                    return Ok(BeginOutcome {
                        session_id: session.id.clone(),
                        is_new: false,
                        terminals: session.inventory(),
                    });
                }
            }
            debug!(requested = id, "requested session not live, creating a new one");
        }

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.settings.max_sessions {
            return Err(MuxError::LimitReached(format!(
                "max sessions ({}) reached",
                self.settings.max_sessions
            )));
        }

        let mut session_id = generate_session_id();
        while sessions.contains_key(&session_id) {
            session_id = generate_session_id();
        }

        transport.send(ServerEvent::SessionCreated(SessionCreatedPayload {
            session_id: session_id.clone(),
        }))?;

        let mut session = Session::new(session_id.clone());
        session.transport = Some(transport.clone());
        sessions.insert(session_id.clone(), Arc::new(Mutex::new(session)));
        info!(session_id = %session_id, transport = transport.id(), "session created");

        Ok(BeginOutcome {
            session_id,
            is_new: true,
            terminals: Vec::new(),
        })
    }

    /// Clear the attachment slot if `transport_id` still holds it.
    ///
    /// Terminals keep running and buffering. Returns whether anything changed.
    pub async fn detach(&self, session_id: &str, transport_id: u64) -> bool {
        let Some(entry) = self.get(session_id).await else {
            return false;
        };
        let mut session = entry.lock().await;
        if session.attached_transport_id() != Some(transport_id) {
            return false;
        }
        session.transport = None;
        session.touch();
        info!(session_id, transport = transport_id, "session detached");
        true
    }

    /// Tear a session down, killing every terminal. Returns whether it existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        let entry = self.sessions.write().await.remove(session_id);
        let Some(entry) = entry else {
            return false;
        };
        let mut session = entry.lock().await;
        let terminals = session.terminals.len();
        session.teardown();
        info!(session_id, terminals, "session removed");
        true
    }

    /// Spawn a shell in the session and reply `terminal-ready` to `requester`.
    ///
    /// The reply is sent before the output pump starts, so no `terminal-data`
    /// for the new terminal can overtake it. Spawn failures leave the session
    /// untouched.
    pub async fn create_terminal(
        &self,
        session_id: &str,
        requester: &dyn Transport,
        request: CreateTerminalPayload,
    ) -> MuxResult<TerminalInfo> {
        let entry = self
            .get(session_id)
            .await
            .ok_or_else(|| MuxError::SessionNotFound(session_id.to_string()))?;

        {
            let mut session = entry.lock().await;
            if session.closed {
                return Err(MuxError::SessionNotFound(session_id.to_string()));
            }
            self.check_terminal_limit(&session)?;
            session.touch();
        }

        let cols = request.cols.unwrap_or(DEFAULT_COLS);
        let rows = request.rows.unwrap_or(DEFAULT_ROWS);
        let spawn_request = SpawnRequest {
            shell: self.settings.shell.clone(),
            cols,
            rows,
            cwd: request
                .cwd
                .map(PathBuf::from)
                .unwrap_or_else(|| self.settings.working_directory.clone()),
            env: self.settings.env.clone(),
        };

        let spawner = self.spawner.clone();
        let spawned = tokio::task::spawn_blocking(move || spawner.spawn(spawn_request))
            .await
            .map_err(|e| MuxError::Spawn(format!("spawn task failed: {e}")))??;

        let mut session = entry.lock().await;
        let limit = if session.closed {
            Err(MuxError::SessionNotFound(session_id.to_string()))
        } else {
            self.check_terminal_limit(&session)
        };
        if let Err(e) = limit {
            if let Err(kill_err) = spawned.handle.terminate() {
                warn!(session_id, error = %kill_err, "failed to terminate orphaned process");
            }
            return Err(e);
        }

        let tab_number = session.terminals.next_tab_number();
        let terminal = TerminalHandle::new(
            tab_number,
            spawned.handle,
            cols,
            rows,
            self.settings.buffer_size,
        );
        let info = terminal.info();

        let ready = ServerEvent::TerminalReady(TerminalReadyPayload {
            terminal_id: info.id.clone(),
            process_id: info.process_id,
            tab_number,
        });
        if let Err(e) = requester.send(ready) {
            debug!(session_id, terminal_id = %info.id, error = %e, "terminal-ready undelivered");
        }

        session.terminals.insert(terminal);
        session.touch();
        tokio::spawn(pump_process_events(
            Arc::downgrade(&entry),
            info.id.clone(),
            spawned.events,
        ));

        info!(
            session_id,
            terminal_id = %info.id,
            tab = tab_number,
            pid = ?info.process_id,
            "terminal created"
        );
        Ok(info)
    }

    fn check_terminal_limit(&self, session: &Session) -> MuxResult<()> {
        if session.terminals.len() >= self.settings.max_terminals_per_session {
            return Err(MuxError::LimitReached(format!(
                "max terminals per session ({}) reached",
                self.settings.max_terminals_per_session
            )));
        }
        Ok(())
    }

    /// Run `f` on a live terminal under the session lock.
    async fn with_terminal<F, R>(&self, session_id: &str, terminal_id: &str, f: F) -> MuxResult<R>
    where
        F: FnOnce(&mut TerminalHandle) -> R,
    {
        let entry = self
            .get(session_id)
            .await
            .ok_or_else(|| MuxError::SessionNotFound(session_id.to_string()))?;
        let mut session = entry.lock().await;
        if session.closed {
            return Err(MuxError::SessionNotFound(session_id.to_string()));
        }
        session.touch();
        let terminal = session
            .terminals
            .get_mut(terminal_id)
            .ok_or_else(|| MuxError::TerminalNotFound(terminal_id.to_string()))?;
        Ok(f(terminal))
    }

    /// Forward input to a terminal. `Ok(false)` if the terminal is unknown.
    ///
    /// The session lock is released before the write, so a process that
    /// stops reading stdin cannot hold up output, reattach or close.
    pub async fn write_input(
        &self,
        session_id: &str,
        terminal_id: &str,
        data: &[u8],
    ) -> MuxResult<bool> {
        let target = self
            .with_terminal(session_id, terminal_id, TerminalHandle::input_target)
            .await;
        unknown_is_false(target.map(|process| process.write(data)))
    }

    /// Resize a terminal. `Ok(false)` if the terminal is unknown.
    pub async fn resize_terminal(
        &self,
        session_id: &str,
        terminal_id: &str,
        cols: u16,
        rows: u16,
    ) -> MuxResult<bool> {
        unknown_is_false(
            self.with_terminal(session_id, terminal_id, |t| t.resize(cols, rows))
                .await,
        )
    }

    /// Update a terminal's label. Returns whether the terminal exists.
    pub async fn rename_terminal(
        &self,
        session_id: &str,
        terminal_id: &str,
        name: Option<String>,
    ) -> bool {
        self.with_terminal(session_id, terminal_id, |t| t.rename(name))
            .await
            .is_ok()
    }

    /// Request termination and drop the handle right away.
    ///
    /// Does not wait for the process to die; its exit arrives separately.
    pub async fn close_terminal(&self, session_id: &str, terminal_id: &str) -> bool {
        let Some(entry) = self.get(session_id).await else {
            return false;
        };
        let mut session = entry.lock().await;
        if session.closed {
            return false;
        }
        session.touch();
        match session.terminals.remove(terminal_id) {
            Some(mut terminal) => {
                terminal.terminate();
                info!(session_id, terminal_id, "terminal closed");
                true
            }
            None => false,
        }
    }

    /// Access a session immutably via a callback.
    pub async fn with_session<F, R>(&self, session_id: &str, f: F) -> MuxResult<R>
    where
        F: FnOnce(&Session) -> R,
    {
        let entry = self
            .get(session_id)
            .await
            .ok_or_else(|| MuxError::SessionNotFound(session_id.to_string()))?;
        let session = entry.lock().await;
        Ok(f(&session))
    }

    /// Expire detached sessions idle for longer than the timeout.
    ///
    /// Returns the IDs of sessions that were removed.
    pub async fn gc(&self) -> Vec<String> {
        self.gc_at(Instant::now()).await
    }

    /// `gc` as of `now`.
    pub async fn gc_at(&self, now: Instant) -> Vec<String> {
        let idle_timeout = self.settings.idle_timeout;
        let mut expired = Vec::new();

        {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|id, entry| {
                // A held lock means the session is busy right now.
                let Ok(mut session) = entry.try_lock() else {
                    return true;
                };
                let idle = now.saturating_duration_since(session.last_activity);
                if session.transport.is_none() && idle > idle_timeout {
                    session.closed = true;
                    warn!(session_id = %id, idle_secs = idle.as_secs(), "session expired (idle)");
                    expired.push(entry.clone());
                    false
                } else {
                    true
                }
            });
        }

        let mut removed = Vec::with_capacity(expired.len());
        for entry in expired {
            let mut session = entry.lock().await;
            session.teardown();
            removed.push(session.id.clone());
        }

        if !removed.is_empty() {
            debug!(count = removed.len(), "GC removed sessions");
        }
        removed
    }

    /// Remove every session and kill every terminal.
    pub async fn shutdown_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            entry.lock().await.teardown();
        }
        info!(count, "all sessions shut down");
        count
    }

    /// List all live sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let entries: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            let session = entry.lock().await;
            if session.closed {
                continue;
            }
            infos.push(SessionInfo {
                id: session.id.clone(),
                terminal_count: session.terminals.len(),
                buffered_bytes: session.terminals.iter().map(TerminalHandle::buffered_len).sum(),
                attached: session.is_attached(),
                idle_secs: session.last_activity.elapsed().as_secs(),
                created_secs: session.created_at.elapsed().as_secs(),
            });
        }
        infos
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Fire-and-forget events ignore unknown sessions and terminals.
fn unknown_is_false(result: MuxResult<MuxResult<()>>) -> MuxResult<bool> {
    match result {
        Ok(outcome) => outcome.map(|()| true),
        Err(MuxError::SessionNotFound(_) | MuxError::TerminalNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Drain one terminal's process events into its session, in order.
async fn pump_process_events(
    session: Weak<Mutex<Session>>,
    terminal_id: String,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(entry) = session.upgrade() else {
            break;
        };
        let mut session = entry.lock().await;
        if session.closed {
            break;
        }
        match event {
            ProcessEvent::Output(chunk) => session.handle_output(&terminal_id, chunk),
            ProcessEvent::Exit(code) => {
                session.handle_exit(&terminal_id, code);
                break;
            }
        }
    }
    debug!(terminal_id = %terminal_id, "process event pump finished");
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

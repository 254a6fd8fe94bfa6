//! Terminal handles and the per-session terminal registry.

use super::process::ProcessHandle;
use super::ring_buffer::RingBuffer;
use shellmux_core::{MuxResult, TerminalInfo};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One spawned shell bound to its output buffer and display metadata.
pub struct TerminalHandle {
    /// Identifier, unique within the owning session.
    pub id: String,
    /// Assigned from the session's tab counter at creation; never changes.
    pub tab_number: u32,
    /// Optional user-assigned label.
    pub custom_name: Option<String>,
    /// Current terminal size.
    pub cols: u16,
    pub rows: u16,
    /// Last output or input.
    pub last_activity: Instant,
    process: Arc<dyn ProcessHandle>,
    buffer: RingBuffer,
}

impl TerminalHandle {
    pub fn new(
        tab_number: u32,
        process: Box<dyn ProcessHandle>,
        cols: u16,
        rows: u16,
        buffer_capacity: usize,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: terminal_id_for_tab(tab_number),
            tab_number,
            custom_name: None,
            cols,
            rows,
            last_activity: now,
            process: Arc::from(process),
            buffer: RingBuffer::new(buffer_capacity),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Inventory entry for `session-resumed`.
    pub fn info(&self) -> TerminalInfo {
        TerminalInfo {
            id: self.id.clone(),
            process_id: self.pid(),
            tab_number: self.tab_number,
            custom_name: self.custom_name.clone(),
        }
    }

    /// The process to write input to, touching the activity clock.
    ///
    /// Returned as a shared handle so the write can happen after the
    /// session lock is released.
    pub fn input_target(&mut self) -> Arc<dyn ProcessHandle> {
        self.last_activity = Instant::now();
        self.process.clone()
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> MuxResult<()> {
        self.process.resize(cols, rows)?;
        self.cols = cols;
        self.rows = rows;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Set or clear the label. Empty names clear it.
    pub fn rename(&mut self, name: Option<String>) {
        self.custom_name = name.filter(|n| !n.is_empty());
    }

    /// Retain output produced while nobody is watching.
    pub fn buffer_output(&mut self, chunk: Vec<u8>) {
        self.last_activity = Instant::now();
        self.buffer.append(chunk);
    }

    /// Buffered output in production order.
    pub fn buffered(&self) -> Vec<u8> {
        self.buffer.snapshot()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Forget buffered output once it has been replayed.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Best-effort kill: failures are logged and never retried.
    pub fn terminate(&mut self) {
        if !self.buffer.is_empty() {
            debug!(terminal_id = %self.id, bytes = self.buffer.len(), "discarding buffered output");
        }
        self.buffer.clear();
        if let Err(e) = self.process.terminate() {
            warn!(terminal_id = %self.id, pid = ?self.pid(), error = %e, "failed to terminate terminal process");
        } else {
            debug!(terminal_id = %self.id, pid = ?self.pid(), "terminate requested");
        }
    }
}

/// Terminal id for a tab number.
pub fn terminal_id_for_tab(tab_number: u32) -> String {
    format!("t{tab_number}")
}

/// A session's terminals in creation order, plus its tab counter.
pub struct TerminalRegistry {
    terminals: Vec<TerminalHandle>,
    next_tab: u32,
}

impl Default for TerminalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalRegistry {
    pub fn new() -> Self {
        Self {
            terminals: Vec::new(),
            next_tab: 1,
        }
    }

    /// Take the next tab number. Numbers are never handed out twice.
    pub fn next_tab_number(&mut self) -> u32 {
        let tab = self.next_tab;
        self.next_tab += 1;
        tab
    }

    pub fn insert(&mut self, terminal: TerminalHandle) {
        self.terminals.push(terminal);
    }

    pub fn get(&self, id: &str) -> Option<&TerminalHandle> {
        self.terminals.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TerminalHandle> {
        self.terminals.iter_mut().find(|t| t.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<TerminalHandle> {
        let index = self.terminals.iter().position(|t| t.id == id)?;
        Some(self.terminals.remove(index))
    }

    /// Remove every terminal, oldest first.
    pub fn drain(&mut self) -> Vec<TerminalHandle> {
        std::mem::take(&mut self.terminals)
    }

    /// Terminals in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &TerminalHandle> {
        self.terminals.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TerminalHandle> {
        self.terminals.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.terminals.len()
    }
}

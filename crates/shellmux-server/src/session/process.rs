//! Process capability consumed by terminals.
//!
//! The session layer never talks to a PTY directly: it spawns through a
//! [`ProcessSpawner`] and drives the result through a [`ProcessHandle`].
//! Output and exit arrive on a separate event channel, so termination is a
//! one-way command and exit is observed independently.

use shellmux_core::MuxResult;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Parameters for spawning one shell process.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

/// Asynchronous notifications from a running process.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// One chunk of output, exactly as read.
    Output(Vec<u8>),
    /// The process exited. Always the last event on the channel.
    Exit(i32),
}

/// Control side of a spawned process.
///
/// Callers hold no session lock while calling `write`, but implementations
/// should still queue input rather than wait on the process to read it.
pub trait ProcessHandle: Send + Sync {
    /// OS process identifier, when the platform reports one.
    fn pid(&self) -> Option<u32>;

    /// Write bytes to the process's stdin.
    fn write(&self, data: &[u8]) -> MuxResult<()>;

    /// Change the terminal size.
    fn resize(&self, cols: u16, rows: u16) -> MuxResult<()>;

    /// Request termination. Does not wait for the process to exit.
    fn terminate(&self) -> MuxResult<()>;
}

/// A freshly spawned process plus its event stream.
pub struct SpawnedProcess {
    pub handle: Box<dyn ProcessHandle>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// Creates shell processes.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, request: SpawnRequest) -> MuxResult<SpawnedProcess>;
}

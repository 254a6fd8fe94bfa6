//! PTY-backed process spawner using portable-pty.
//!
//! Opens a pseudo-terminal running the configured shell. A dedicated reader
//! thread forwards output chunks onto the process event channel and reports
//! the exit code once the PTY reaches EOF.

use super::process::{ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest, SpawnedProcess};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use shellmux_core::{MuxError, MuxResult};
use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const READ_CHUNK_SIZE: usize = 8192;

/// Spawns shells on native pseudo-terminals.
#[derive(Debug, Default)]
pub struct PtySpawner;

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, request: SpawnRequest) -> MuxResult<SpawnedProcess> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MuxError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(&request.shell);
        cmd.cwd(&request.cwd);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| MuxError::Spawn(format!("failed to spawn {}: {e}", request.shell)))?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| MuxError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| MuxError::Spawn(format!("failed to take PTY writer: {e}")))?;
        let input = InputWriter::spawn(writer, format!("pty-writer-{}", pid.unwrap_or_default()))
            .map_err(|e| MuxError::Spawn(format!("failed to start PTY writer: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || pump_output(reader, child, tx))
            .map_err(|e| MuxError::Spawn(format!("failed to start PTY reader: {e}")))?;

        info!(
            shell = %request.shell,
            cwd = %request.cwd.display(),
            cols = request.cols,
            rows = request.rows,
            pid = ?pid,
            "PTY spawned"
        );

        Ok(SpawnedProcess {
            handle: Box::new(PtyProcess {
                input,
                master: Mutex::new(pair.master),
                killer: Mutex::new(killer),
                pid,
            }),
            events: rx,
        })
    }
}

/// Feeds a PTY's stdin from a dedicated thread.
///
/// A program that stops reading stdin fills the PTY input queue and makes
/// writes block; only this thread ever waits on that.
struct InputWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl InputWriter {
    fn spawn(mut writer: Box<dyn Write + Send>, name: String) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        std::thread::Builder::new().name(name).spawn(move || {
            while let Some(data) = rx.blocking_recv() {
                if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                    debug!(error = %e, "PTY input writer stopped");
                    break;
                }
            }
        })?;
        Ok(Self { tx })
    }

    /// Queue bytes for the process. Never blocks.
    fn send(&self, data: &[u8]) -> MuxResult<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| MuxError::Process("PTY input closed".into()))
    }
}

/// A live shell on a PTY.
struct PtyProcess {
    input: InputWriter,
    /// Kept for resize; dropping it closes the PTY.
    master: Mutex<Box<dyn MasterPty + Send>>,
    /// Cloned from the child so killing never waits on the reader thread.
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
}

impl ProcessHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: &[u8]) -> MuxResult<()> {
        self.input.send(data)
    }

    fn resize(&self, cols: u16, rows: u16) -> MuxResult<()> {
        let master = self
            .master
            .lock()
            .map_err(|_| MuxError::Process("PTY master lock poisoned".into()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MuxError::Process(format!("PTY resize failed: {e}")))?;
        debug!(pid = ?self.pid, cols, rows, "PTY resized");
        Ok(())
    }

    fn terminate(&self) -> MuxResult<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| MuxError::Process("PTY killer lock poisoned".into()))?;
        killer
            .kill()
            .map_err(|e| MuxError::Process(format!("kill failed: {e}")))
    }
}

/// Reader thread body: forward output until EOF, then report the exit code.
fn pump_output(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    tx: mpsc::UnboundedSender<ProcessEvent>,
) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let complete = complete_utf8_prefix(&pending);
                if complete == 0 {
                    continue;
                }
                let rest = pending.split_off(complete);
                let chunk = std::mem::replace(&mut pending, rest);
                if tx.send(ProcessEvent::Output(chunk)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO on Linux once the child side has closed.
                debug!(error = %e, "PTY read ended");
                break;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(ProcessEvent::Output(pending));
    }

    let code = match child.wait() {
        Ok(status) => i32::try_from(status.exit_code()).unwrap_or(-1),
        Err(e) => {
            warn!(error = %e, "failed to wait for PTY child");
            -1
        }
    };
    info!(code, "PTY child exited");
    let _ = tx.send(ProcessEvent::Exit(code));
}

/// Length of the longest prefix of `buf` that does not end inside a
/// multi-byte UTF-8 sequence.
///
/// Invalid bytes in the middle are left for the lossy conversion at the wire
/// boundary; only a truncated trailing sequence is held back.
fn complete_utf8_prefix(buf: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&buf[start..]) {
            Ok(_) => return buf.len(),
            Err(e) => match e.error_len() {
                // Truncated sequence at the very end.
                None => return start + e.valid_up_to(),
                Some(invalid) => start += e.valid_up_to() + invalid,
            },
        }
    }
}

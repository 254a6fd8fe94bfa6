//! Test doubles for the session layer.

use super::process::{ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest, SpawnedProcess};
use shellmux_core::{MuxError, MuxResult, ServerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Test-side control over one mock process.
#[derive(Clone)]
pub struct MockProcessControl {
    pub pid: u32,
    pub request: SpawnRequest,
    events: mpsc::UnboundedSender<ProcessEvent>,
    writes: Arc<Mutex<Vec<u8>>>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    terminated: Arc<AtomicBool>,
    fail_terminate: Arc<AtomicBool>,
    /// While the flag is set, `write` blocks like a process not reading stdin.
    write_gate: Arc<(Mutex<bool>, Condvar)>,
    write_blocked: Arc<AtomicBool>,
}

impl MockProcessControl {
    /// Simulate one chunk of process output.
    pub fn emit(&self, data: &[u8]) {
        let _ = self.events.send(ProcessEvent::Output(data.to_vec()));
    }

    /// Simulate process exit.
    pub fn exit(&self, code: i32) {
        let _ = self.events.send(ProcessEvent::Exit(code));
    }

    /// Everything written to stdin so far.
    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().unwrap().clone()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Make subsequent writes block until `release_writes` or `terminate`.
    pub fn hold_writes(&self) {
        *self.write_gate.0.lock().unwrap() = true;
    }

    pub fn release_writes(&self) {
        *self.write_gate.0.lock().unwrap() = false;
        self.write_gate.1.notify_all();
    }

    /// Whether a write is currently stuck behind `hold_writes`.
    pub fn write_blocked(&self) -> bool {
        self.write_blocked.load(Ordering::SeqCst)
    }

    /// Make subsequent `terminate` calls fail.
    pub fn fail_terminate(&self) {
        self.fail_terminate.store(true, Ordering::SeqCst);
    }
}

struct MockProcess {
    control: MockProcessControl,
}

impl ProcessHandle for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.control.pid)
    }

    fn write(&self, data: &[u8]) -> MuxResult<()> {
        let (held, released) = &*self.control.write_gate;
        let mut held = held.lock().unwrap();
        while *held {
            self.control.write_blocked.store(true, Ordering::SeqCst);
            held = released.wait(held).unwrap();
        }
        self.control.write_blocked.store(false, Ordering::SeqCst);
        drop(held);
        self.control.writes.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, cols: u16, rows: u16) -> MuxResult<()> {
        self.control.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    fn terminate(&self) -> MuxResult<()> {
        if self.control.fail_terminate.load(Ordering::SeqCst) {
            return Err(MuxError::Process("mock kill failure".into()));
        }
        self.control.terminated.store(true, Ordering::SeqCst);
        // A killed process no longer holds up its writers.
        self.control.release_writes();
        Ok(())
    }
}

#[derive(Default)]
struct SpawnerState {
    spawned: Vec<MockProcessControl>,
    fail_next: Option<String>,
}

/// A spawner whose processes are driven by the test.
#[derive(Default)]
pub struct MockSpawner {
    state: Mutex<SpawnerState>,
}

impl MockSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next spawn fail with `message`.
    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().fail_next = Some(message.to_string());
    }

    /// Control handle for the `index`-th successfully spawned process.
    pub fn process(&self, index: usize) -> MockProcessControl {
        self.state.lock().unwrap().spawned[index].clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().spawned.len()
    }
}

impl ProcessSpawner for MockSpawner {
    fn spawn(&self, request: SpawnRequest) -> MuxResult<SpawnedProcess> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next.take() {
            return Err(MuxError::Spawn(message));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let control = MockProcessControl {
            pid: 1000 + state.spawned.len() as u32,
            request,
            events: tx,
            writes: Arc::new(Mutex::new(Vec::new())),
            resizes: Arc::new(Mutex::new(Vec::new())),
            terminated: Arc::new(AtomicBool::new(false)),
            fail_terminate: Arc::new(AtomicBool::new(false)),
            write_gate: Arc::new((Mutex::new(false), Condvar::new())),
            write_blocked: Arc::new(AtomicBool::new(false)),
        };
        state.spawned.push(control.clone());

        Ok(SpawnedProcess {
            handle: Box::new(MockProcess { control }),
            events: rx,
        })
    }
}

/// Next outbound event, failing the test after one second.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("transport channel closed")
}

/// Assert nothing else is queued.
pub fn no_more_events(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) {
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event: {event:?}");
    }
}

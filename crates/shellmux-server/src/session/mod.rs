//! Session management: terminals, replay buffers, reattachment, expiry.

pub mod process;
pub mod pty;
pub mod reaper;
pub mod registry;
pub mod ring_buffer;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;

pub use process::ProcessSpawner;
pub use pty::PtySpawner;
pub use reaper::spawn_reaper;
pub use registry::{RegistrySettings, SessionRegistry};

//! Background sweep that expires idle, detached sessions.

use super::registry::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Start the reaper. It runs until the returned handle is aborted.
pub fn spawn_reaper(registry: Arc<SessionRegistry>, period: Duration) -> JoinHandle<()> {
    info!(
        period_secs = period.as_secs(),
        idle_timeout_secs = registry.settings().idle_timeout.as_secs(),
        "session reaper started"
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = registry.gc().await;
            if !removed.is_empty() {
                info!(count = removed.len(), "reaper expired sessions");
            }
            let sessions = registry.list().await;
            for s in &sessions {
                trace!(
                    session_id = %s.id,
                    terminals = s.terminal_count,
                    attached = s.attached,
                    idle_secs = s.idle_secs,
                    age_secs = s.created_secs,
                    buffered = s.buffered_bytes,
                    "session"
                );
            }
            let detached = sessions.iter().filter(|s| !s.attached).count();
            let terminals: usize = sessions.iter().map(|s| s.terminal_count).sum();
            let buffered: usize = sessions.iter().map(|s| s.buffered_bytes).sum();
            debug!(sessions = sessions.len(), detached, terminals, buffered, "reaper tick");
        }
    })
}

// ============================
// livecollab-backend-lib/src/scheduler.rs
// ============================
//! Periodic refresh driver.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::room_actor::RegistryHandle;

/// Spawn the refresh loop: every `period`, ask the registry to re-fetch the
/// symbols of its occupied stock rooms. The first tick fires one full
/// period after startup, not immediately; rooms fetch lazily on join.
pub fn spawn_refresh(handle: RegistryHandle, period: Duration) -> JoinHandle<()> {
    info!(period_secs = period.as_secs(), "starting refresh loop");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // interval's first tick completes immediately; skip it.
        interval.tick().await;
        loop {
            interval.tick().await;
            handle.refresh_tick();
        }
    })
}

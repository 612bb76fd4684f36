//! Snapshot lifecycle around the HTTP server: restore on start, a periodic
//! save ticker, and one final save on shutdown. All of it is a no-op when
//! the storage variant has no file capability or no path is configured.

use crate::state::AppState;
use tokio::task::JoinHandle;
use tokio::time::interval;

pub async fn restore_on_start(state: &AppState, restore: bool) {
    if !restore {
        return;
    }
    let Some(policy) = &state.snapshot else {
        return;
    };
    let Some(file_store) = state.storage.file_backed() else {
        return;
    };
    if let Err(err) = file_store.load_from_file(&policy.path).await {
        tracing::warn!(path = %policy.path.display(), error = %err, "failed to restore metrics from file");
    }
}

/// Spawns the periodic save task when the store interval is non-zero.
/// With a zero interval the handlers snapshot synchronously instead, so
/// the file is never written from two places at once.
pub fn spawn_periodic_save(state: &AppState) -> Option<JoinHandle<()>> {
    let policy = state.snapshot.clone()?;
    if policy.interval.is_zero() {
        return None;
    }
    state.storage.file_backed()?;

    let state = state.clone();
    Some(tokio::spawn(async move {
        let mut tick = interval(policy.interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Some(file_store) = state.storage.file_backed() {
                if let Err(err) = file_store.save_to_file(&policy.path).await {
                    tracing::error!(path = %policy.path.display(), error = %err, "auto-save failed");
                }
            }
        }
    }))
}

pub async fn final_save(state: &AppState) {
    let Some(policy) = &state.snapshot else {
        return;
    };
    let Some(file_store) = state.storage.file_backed() else {
        return;
    };
    if let Err(err) = file_store.save_to_file(&policy.path).await {
        tracing::error!(path = %policy.path.display(), error = %err, "final snapshot failed");
    }
}

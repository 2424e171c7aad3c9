//! Background maintenance jobs.
//!
//! Each job is one spawned loop on a tokio interval with
//! `MissedTickBehavior::Delay`: a tick never starts before the previous run
//! completes, so every job is re-entrancy guarded for free. The watchdog's
//! first tick fires immediately, which doubles as the crash-recovery pass
//! for orders whose in-process auto-cancel timer died with the process.

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};

use crate::accounts::devices;
use crate::orders::machine;
use crate::restaurants::crud;
use crate::state::AppState;

/// Spawn all periodic jobs. Intervals come from the [timing] config.
pub fn spawn_all(state: AppState) {
    spawn_heartbeat(state.clone());
    spawn_token_sweep(state.clone());
    spawn_auto_cancel_watchdog(state.clone());
    spawn_opening_watcher(state);
}

/// Heartbeat tick: drive the registry's ping/terminate sweep.
fn spawn_heartbeat(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = interval(state.timings.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            state.channels.heartbeat_sweep();
        }
    });
}

/// Expired-token sweep: bulk purge of stale device records.
fn spawn_token_sweep(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = interval(state.timings.token_sweep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let db = state.db.clone();
            let swept = tokio::task::spawn_blocking(move || {
                let conn = db.lock().ok()?;
                devices::sweep_expired(&conn).ok()
            })
            .await
            .ok()
            .flatten()
            .unwrap_or(0);
            if swept > 0 {
                tracing::info!(swept, "expired device tokens purged");
            }
        }
    });
}

/// Auto-cancel watchdog: cancel Placed orders past the deadline. Idempotent
/// with the in-process per-order timers through the guarded transition.
fn spawn_auto_cancel_watchdog(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = interval(state.timings.watchdog);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let cutoff = (Utc::now()
                - chrono::Duration::from_std(state.timings.auto_cancel)
                    .unwrap_or_else(|_| chrono::Duration::seconds(480)))
            .to_rfc3339();

            let db = state.db.clone();
            let overdue = tokio::task::spawn_blocking(move || {
                let conn = db.lock().ok()?;
                machine::overdue_placed_orders(&conn, &cutoff).ok()
            })
            .await
            .ok()
            .flatten()
            .unwrap_or_default();

            for order_id in overdue {
                machine::auto_cancel_if_still_placed(&state, &order_id).await;
            }
        }
    });
}

/// Opening-time watcher: flip restaurants whose scheduled opening has
/// passed from inactive to active.
fn spawn_opening_watcher(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = interval(state.timings.opening_watch);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let db = state.db.clone();
            let opened = tokio::task::spawn_blocking(move || {
                let conn = db.lock().ok()?;
                crud::open_due_restaurants(&conn).ok()
            })
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
            if !opened.is_empty() {
                tracing::info!(count = opened.len(), "restaurants opened on schedule");
            }
        }
    });
}

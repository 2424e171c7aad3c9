//! Order lifecycle state machine.
//!
//! Transitions are applied as a single conditional UPDATE guarded on the
//! allowed source states, which makes them linearizable: the in-process
//! auto-cancel timer, the scheduler watchdog and the REST handlers can all
//! race on the same order and at most one of them wins.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{Order, OrderStatus};
use crate::error::AppError;
use crate::notify::event::NotificationKind;
use crate::notify::NotificationEvent;
use crate::state::AppState;

/// Reason recorded when the restaurant never accepted the order in time.
pub const AUTO_CANCEL_REASON: &str = "Your chosen restaurant couldn't take your order this time, but don't worry — we have plenty of other amazing restaurants waiting to serve you. Explore your next favorite meal now!";

/// Accepted size labels for order line items.
pub const VALID_SIZES: [&str; 4] = ["Small", "Medium", "Large", "Regular"];

/// Source states from which the target status may be entered. Preparing is
/// reserved: accepted as a pass-through source but written by no endpoint.
pub fn allowed_sources(target: OrderStatus) -> &'static [OrderStatus] {
    match target {
        OrderStatus::Placed => &[],
        OrderStatus::Accepted => &[OrderStatus::Placed],
        OrderStatus::Preparing => &[OrderStatus::Accepted],
        OrderStatus::Ready => &[OrderStatus::Accepted, OrderStatus::Preparing],
        OrderStatus::Delivered => &[
            OrderStatus::Accepted,
            OrderStatus::Preparing,
            OrderStatus::Ready,
        ],
        OrderStatus::Cancelled => &[
            OrderStatus::Placed,
            OrderStatus::Accepted,
            OrderStatus::Preparing,
        ],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_sources(to).contains(&from)
}

pub fn load_order(conn: &Connection, order_id: &str) -> Result<Option<Order>, AppError> {
    let order = conn
        .query_row(
            "SELECT * FROM orders WHERE id = ?1",
            params![order_id],
            Order::from_row,
        )
        .optional()?;
    Ok(order)
}

/// Apply a guarded transition. Returns the refreshed order when exactly the
/// conditional UPDATE matched, None when the order was missing or not in an
/// allowed source state (the caller maps that to 404 or 409).
pub fn apply_transition(
    conn: &Connection,
    order_id: &str,
    target: OrderStatus,
    reason: Option<&str>,
    allowed_from: &[OrderStatus],
) -> Result<Option<Order>, AppError> {
    if allowed_from.is_empty() {
        return Ok(None);
    }

    let now = Utc::now().to_rfc3339();
    let placeholders = (5..5 + allowed_from.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE orders SET status = ?1, cancellation_reason = COALESCE(?2, cancellation_reason),
         updated_at = ?3 WHERE id = ?4 AND status IN ({placeholders})"
    );

    // Positional params: status, reason, now, id, then the source states.
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(target.as_str().to_string()),
        Box::new(reason.map(|r| r.to_string())),
        Box::new(now),
        Box::new(order_id.to_string()),
    ];
    for status in allowed_from {
        values.push(Box::new(status.as_str().to_string()));
    }

    let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let changed = conn.execute(&sql, params_ref.as_slice())?;
    if changed == 0 {
        return Ok(None);
    }

    load_order(conn, order_id)
}

/// Emit the Notification Event matching the order's new status on the
/// current task. Dispatch failures never roll back the persisted state.
pub fn emit_status_event(state: &AppState, order: &Order) {
    if let Some(kind) = NotificationKind::for_status(order.status) {
        state
            .dispatcher
            .dispatch(NotificationEvent::for_order(order, kind));
    }
}

/// Arm the in-process auto-cancel timer for a freshly placed order. The
/// timer is best-effort across restarts; the scheduler watchdog covers
/// orders whose timer died with the process.
pub fn arm_auto_cancel(state: &AppState, order_id: String) {
    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(state.timings.auto_cancel).await;
        auto_cancel_if_still_placed(&state, &order_id).await;
    });
}

/// Cancel the order if it is still Placed; no-op otherwise. Shared by the
/// per-order timer and the watchdog, idempotent through the state guard.
pub async fn auto_cancel_if_still_placed(state: &AppState, order_id: &str) {
    let db = state.db.clone();
    let id = order_id.to_string();

    let cancelled = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        apply_transition(
            &conn,
            &id,
            OrderStatus::Cancelled,
            Some(AUTO_CANCEL_REASON),
            &[OrderStatus::Placed],
        )
    })
    .await;

    match cancelled {
        Ok(Ok(Some(order))) => {
            tracing::info!(order_id = %order.id, "order auto-cancelled after deadline");
            emit_status_event(state, &order);
        }
        Ok(Ok(None)) => {
            // Already accepted, delivered or cancelled; nothing to do.
        }
        Ok(Err(err)) => {
            tracing::error!(order_id = %order_id, error = %err, "auto-cancel failed");
        }
        Err(err) => {
            tracing::error!(order_id = %order_id, error = %err, "auto-cancel task failed");
        }
    }
}

/// Orders still Placed past the deadline; the watchdog cancels each via the
/// same guarded transition the per-order timer uses.
pub fn overdue_placed_orders(
    conn: &Connection,
    cutoff_rfc3339: &str,
) -> Result<Vec<String>, AppError> {
    let mut stmt =
        conn.prepare("SELECT id FROM orders WHERE status = 'Placed' AND created_at < ?1")?;
    let ids = stmt
        .query_map(params![cutoff_rfc3339], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

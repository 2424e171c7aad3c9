//! REST handlers for the order lifecycle.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::accounts::registration::load_user;
use crate::auth::middleware::Claims;
use crate::db::models::{
    cents_from_amount, Order, OrderItem, OrderStatus, Platform, Role,
};
use crate::error::{success, AppError};
use crate::orders::machine;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub restaurant: String,
    #[serde(default)]
    pub restaurant_name: Option<String>,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub address: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// POST /api/orders — place an order (customer role only).
pub async fn create_order(
    State(state): State<AppState>,
    claims: Claims,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let Json(body) = body?;
    if body.items.is_empty() {
        return Err(AppError::Validation("items must not be empty".into()));
    }
    for item in &body.items {
        if item.menu_item_id.is_empty() || item.item_name.is_empty() {
            return Err(AppError::Validation(
                "each item needs a menu item id and a name".into(),
            ));
        }
        if item.quantity < 1 {
            return Err(AppError::Validation("item quantity must be at least 1".into()));
        }
        if !machine::VALID_SIZES.contains(&item.size.as_str()) {
            return Err(AppError::Validation(format!(
                "unknown size '{}'",
                item.size
            )));
        }
    }
    let total_cents = cents_from_amount(body.total_amount);
    if total_cents <= 0 {
        return Err(AppError::Validation("totalAmount must be positive".into()));
    }
    if body.address.trim().is_empty() {
        return Err(AppError::Validation("address must not be empty".into()));
    }
    let platform = Platform::parse(body.platform.as_deref().unwrap_or("app"));

    let db = state.db.clone();
    let customer_id = claims.sub.clone();
    let order = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;

        // Role guard reads the store, not the token, so a promotion since
        // login is honored.
        let caller = load_user(&conn, &customer_id)?;
        if caller.role != Role::User {
            return Err(AppError::Forbidden("only customers can place orders".into()));
        }

        let restaurant: Option<(String, String)> = conn
            .query_row(
                "SELECT name, owner_id FROM restaurants WHERE id = ?1",
                params![body.restaurant],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((restaurant_name, owner_id)) = restaurant else {
            return Err(AppError::Validation("unknown restaurant".into()));
        };
        if owner_id == caller.id {
            return Err(AppError::Validation(
                "restaurant owners cannot order from their own restaurant".into(),
            ));
        }

        let order_id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let items_json =
            serde_json::to_string(&body.items).map_err(|e| AppError::internal(e))?;
        let cached_name = body
            .restaurant_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(restaurant_name);

        conn.execute(
            "INSERT INTO orders (id, restaurant_id, restaurant_name, customer_id, items,
             total_cents, address, status, platform, cancellation_reason, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'Placed', ?8, '', ?9, ?9)",
            params![
                order_id,
                body.restaurant,
                cached_name,
                caller.id,
                items_json,
                total_cents,
                body.address,
                platform.as_str(),
                now
            ],
        )?;

        machine::load_order(&conn, &order_id)?
            .ok_or_else(|| AppError::Internal("order vanished after insert".into()))
    })
    .await??;

    tracing::info!(order_id = %order.id, restaurant_id = %order.restaurant_id, "order placed");

    // Deadline timer for the restaurant to accept; survives only within
    // this process; the watchdog covers the rest.
    machine::arm_auto_cancel(&state, order.id.clone());
    machine::emit_status_event(&state, &order);

    Ok((
        StatusCode::CREATED,
        success("Order placed successfully", json!({ "order": order.snapshot() })),
    ))
}

/// GET /api/orders — the caller's orders, newest first.
pub async fn list_my_orders(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let orders = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM orders WHERE customer_id = ?1 ORDER BY created_at DESC",
        )?;
        let orders: Vec<Order> = stmt
            .query_map(params![claims.sub], Order::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, AppError>(orders)
    })
    .await??;

    let snapshots: Vec<_> = orders.iter().map(Order::snapshot).collect();
    Ok(success("orders fetched", json!({ "orders": snapshots })))
}

#[derive(Debug, Deserialize)]
pub struct RestaurantOrdersQuery {
    pub status: Option<String>,
}

/// GET /api/orders/restaurant/{restaurantId}?status=<s> — today's orders
/// for a restaurant, visible to its owner only.
pub async fn list_restaurant_orders(
    State(state): State<AppState>,
    claims: Claims,
    Path(restaurant_id): Path<String>,
    Query(query): Query<RestaurantOrdersQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status_filter = match query.status.as_deref() {
        Some(raw) => Some(
            OrderStatus::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("unknown status '{raw}'")))?,
        ),
        None => None,
    };

    let db = state.db.clone();
    let orders = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        require_restaurant_owner(&conn, &restaurant_id, &claims.sub)?;

        let today_start = format!("{}T00:00:00+00:00", Utc::now().format("%Y-%m-%d"));
        let orders: Vec<Order> = match status_filter {
            Some(status) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM orders WHERE restaurant_id = ?1 AND created_at >= ?2
                     AND status = ?3 ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map(
                    params![restaurant_id, today_start, status.as_str()],
                    Order::from_row,
                )?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM orders WHERE restaurant_id = ?1 AND created_at >= ?2
                     ORDER BY created_at DESC",
                )?;
                let rows =
                    stmt.query_map(params![restaurant_id, today_start], Order::from_row)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };
        Ok::<_, AppError>(orders)
    })
    .await??;

    let snapshots: Vec<_> = orders.iter().map(Order::snapshot).collect();
    Ok(success("orders fetched", json!({ "orders": snapshots })))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// PATCH /api/orders/{id}/confirm
pub async fn confirm_order(
    state: State<AppState>,
    claims: Claims,
    path: Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    transition_order(state, claims, path, OrderStatus::Accepted, None).await
}

/// PATCH /api/orders/{id}/ready
pub async fn ready_order(
    state: State<AppState>,
    claims: Claims,
    path: Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    transition_order(state, claims, path, OrderStatus::Ready, None).await
}

/// PATCH /api/orders/{id}/deliver
pub async fn deliver_order(
    state: State<AppState>,
    claims: Claims,
    path: Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    transition_order(state, claims, path, OrderStatus::Delivered, None).await
}

/// PATCH /api/orders/{id}/cancel — body may carry `{reason}`.
pub async fn cancel_order(
    state: State<AppState>,
    claims: Claims,
    path: Path<String>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    // The body is optional; an absent or empty body cancels without a reason.
    let reason = body
        .ok()
        .and_then(|Json(b)| b.reason)
        .unwrap_or_default();
    transition_order(state, claims, path, OrderStatus::Cancelled, Some(reason)).await
}

/// Shared transition path: ownership check, guarded update, event emission.
async fn transition_order(
    State(state): State<AppState>,
    claims: Claims,
    Path(order_id): Path<String>,
    target: OrderStatus,
    reason: Option<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let id = order_id.clone();
    let order = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;

        let existing = machine::load_order(&conn, &id)?
            .ok_or_else(|| AppError::NotFound("order not found".into()))?;
        require_restaurant_owner(&conn, &existing.restaurant_id, &claims.sub)?;

        if existing.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "order is already {}",
                existing.status.as_str()
            )));
        }

        let updated = machine::apply_transition(
            &conn,
            &id,
            target,
            reason.as_deref(),
            machine::allowed_sources(target),
        )?;
        updated.ok_or_else(|| {
            AppError::Conflict(format!(
                "cannot move a {} order to {}",
                existing.status.as_str(),
                target.as_str()
            ))
        })
    })
    .await??;

    tracing::info!(
        order_id = %order.id,
        status = order.status.as_str(),
        "order transitioned"
    );
    machine::emit_status_event(&state, &order);

    Ok(success(
        &format!("Order {}", order.status.as_str().to_lowercase()),
        json!({ "order": order.snapshot() }),
    ))
}

/// Ownership guard shared by the order and restaurant handlers.
pub fn require_restaurant_owner(
    conn: &Connection,
    restaurant_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    let owner_id: Option<String> = conn
        .query_row(
            "SELECT owner_id FROM restaurants WHERE id = ?1",
            params![restaurant_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner_id {
        None => Err(AppError::NotFound("restaurant not found".into())),
        Some(owner) if owner == user_id => Ok(()),
        Some(_) => Err(AppError::Forbidden(
            "you do not own this restaurant".into(),
        )),
    }
}

//! Menu management: embedded per-restaurant items with a size -> price map.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::MenuItem;
use crate::error::{success, AppError};
use crate::orders::handlers::require_restaurant_owner;
use crate::state::AppState;

fn load_menu(conn: &Connection, restaurant_id: &str) -> Result<Vec<MenuItem>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM menu_items WHERE restaurant_id = ?1 ORDER BY created_at",
    )?;
    let items = stmt
        .query_map(params![restaurant_id], MenuItem::from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(items)
}

fn restaurant_exists(conn: &Connection, restaurant_id: &str) -> Result<(), AppError> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM restaurants WHERE id = ?1",
        params![restaurant_id],
        |row| row.get(0),
    )?;
    if found == 0 {
        return Err(AppError::NotFound("restaurant not found".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct MenuItemBody {
    pub name: String,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub sizes: BTreeMap<String, f64>,
}

fn default_available() -> bool {
    true
}

fn validate_item(body: &MenuItemBody) -> Result<(), AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("item name must not be empty".into()));
    }
    if body.sizes.is_empty() {
        return Err(AppError::Validation("item needs at least one size".into()));
    }
    if body.sizes.values().any(|price| *price < 0.0) {
        return Err(AppError::Validation("prices must not be negative".into()));
    }
    Ok(())
}

/// GET /api/restaurants/{id}/menu — public.
pub async fn get_menu(
    State(state): State<AppState>,
    Path(restaurant_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let items = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        restaurant_exists(&conn, &restaurant_id)?;
        load_menu(&conn, &restaurant_id)
    })
    .await??;

    Ok(success("menu fetched", json!({ "menu": items })))
}

/// PUT /api/restaurants/{id}/menu — owner replaces the whole menu.
pub async fn replace_menu(
    State(state): State<AppState>,
    claims: Claims,
    Path(restaurant_id): Path<String>,
    Json(body): Json<Vec<MenuItemBody>>,
) -> Result<Json<serde_json::Value>, AppError> {
    for item in &body {
        validate_item(item)?;
    }

    let db = state.db.clone();
    let items = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock()?;
        require_restaurant_owner(&conn, &restaurant_id, &claims.sub)?;

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM menu_items WHERE restaurant_id = ?1",
            params![restaurant_id],
        )?;
        let now = Utc::now().to_rfc3339();
        for item in &body {
            let sizes_json =
                serde_json::to_string(&item.sizes).map_err(AppError::internal)?;
            tx.execute(
                "INSERT INTO menu_items (id, restaurant_id, name, available, sizes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::now_v7().to_string(),
                    restaurant_id,
                    item.name.trim(),
                    item.available,
                    sizes_json,
                    now
                ],
            )?;
        }
        tx.commit()?;

        load_menu(&conn, &restaurant_id)
    })
    .await??;

    Ok(success("menu replaced", json!({ "menu": items })))
}

/// POST /api/restaurants/{id}/menu — owner adds one item.
pub async fn add_item(
    State(state): State<AppState>,
    claims: Claims,
    Path(restaurant_id): Path<String>,
    Json(body): Json<MenuItemBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    validate_item(&body)?;

    let db = state.db.clone();
    let item = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        require_restaurant_owner(&conn, &restaurant_id, &claims.sub)?;

        let item_id = Uuid::now_v7().to_string();
        let sizes_json = serde_json::to_string(&body.sizes).map_err(AppError::internal)?;
        conn.execute(
            "INSERT INTO menu_items (id, restaurant_id, name, available, sizes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item_id,
                restaurant_id,
                body.name.trim(),
                body.available,
                sizes_json,
                Utc::now().to_rfc3339()
            ],
        )?;

        let item = conn.query_row(
            "SELECT * FROM menu_items WHERE id = ?1",
            params![item_id],
            MenuItem::from_row,
        )?;
        Ok::<_, AppError>(item)
    })
    .await??;

    Ok((
        StatusCode::CREATED,
        success("item added", json!({ "item": item })),
    ))
}

/// PUT /api/restaurants/{id}/menu/{itemId} — owner updates one item.
pub async fn update_item(
    State(state): State<AppState>,
    claims: Claims,
    Path((restaurant_id, item_id)): Path<(String, String)>,
    Json(body): Json<MenuItemBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_item(&body)?;

    let db = state.db.clone();
    let item = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        require_restaurant_owner(&conn, &restaurant_id, &claims.sub)?;

        let sizes_json = serde_json::to_string(&body.sizes).map_err(AppError::internal)?;
        let changed = conn.execute(
            "UPDATE menu_items SET name = ?3, available = ?4, sizes = ?5
             WHERE id = ?1 AND restaurant_id = ?2",
            params![item_id, restaurant_id, body.name.trim(), body.available, sizes_json],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound("menu item not found".into()));
        }

        let item = conn.query_row(
            "SELECT * FROM menu_items WHERE id = ?1",
            params![item_id],
            MenuItem::from_row,
        )?;
        Ok::<_, AppError>(item)
    })
    .await??;

    Ok(success("item updated", json!({ "item": item })))
}

/// DELETE /api/restaurants/{id}/menu/{itemId}
pub async fn delete_item(
    State(state): State<AppState>,
    claims: Claims,
    Path((restaurant_id, item_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        require_restaurant_owner(&conn, &restaurant_id, &claims.sub)?;

        let removed = conn.execute(
            "DELETE FROM menu_items WHERE id = ?1 AND restaurant_id = ?2",
            params![item_id, restaurant_id],
        )?;
        if removed == 0 {
            return Err(AppError::NotFound("menu item not found".into()));
        }
        Ok::<_, AppError>(())
    })
    .await??;

    Ok(success("item removed", json!({})))
}

//! Restaurant CRUD, status toggling and scheduled opening.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::db::models::Restaurant;
use crate::error::{success, AppError};
use crate::orders::handlers::require_restaurant_owner;
use crate::state::AppState;

pub fn load_restaurant(conn: &Connection, id: &str) -> Result<Restaurant, AppError> {
    conn.query_row(
        "SELECT * FROM restaurants WHERE id = ?1",
        params![id],
        Restaurant::from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("restaurant not found".into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRestaurantRequest {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub opening_time: Option<String>,
}

/// POST /api/restaurants — create a restaurant owned by the caller. The
/// owner reference and the caller's role change land in one transaction,
/// keeping the two foreign keys coherent.
pub async fn create_restaurant(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateRestaurantRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }
    if let Some(opening) = &body.opening_time {
        parse_opening_time(opening)?;
    }

    let db = state.db.clone();
    let restaurant = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let already_owned: Option<String> = tx
            .query_row(
                "SELECT id FROM restaurants WHERE owner_id = ?1",
                params![claims.sub],
                |row| row.get(0),
            )
            .optional()?;
        if already_owned.is_some() {
            return Err(AppError::Conflict("user already owns a restaurant".into()));
        }

        let restaurant_id = Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO restaurants (id, name, address, image_url, is_active, owner_id,
             opening_time, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?7)",
            params![
                restaurant_id,
                body.name.trim(),
                body.address,
                body.image_url,
                claims.sub,
                body.opening_time,
                now
            ],
        )?;
        tx.execute(
            "UPDATE users SET role = 'restaurant', restaurant_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![claims.sub, restaurant_id, now],
        )?;

        let restaurant = tx.query_row(
            "SELECT * FROM restaurants WHERE id = ?1",
            params![restaurant_id],
            Restaurant::from_row,
        )?;
        tx.commit()?;
        Ok::<_, AppError>(restaurant)
    })
    .await??;

    tracing::info!(restaurant_id = %restaurant.id, owner_id = %restaurant.owner_id, "restaurant created");
    Ok((
        StatusCode::CREATED,
        success(
            "restaurant created",
            json!({ "restaurant": restaurant.snapshot() }),
        ),
    ))
}

/// GET /api/restaurants — public listing.
pub async fn list_restaurants(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let restaurants = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM restaurants ORDER BY name")?;
        let restaurants: Vec<Restaurant> = stmt
            .query_map([], Restaurant::from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, AppError>(restaurants)
    })
    .await??;

    let snapshots: Vec<_> = restaurants.iter().map(Restaurant::snapshot).collect();
    Ok(success("restaurants fetched", json!({ "restaurants": snapshots })))
}

/// GET /api/restaurants/{id} — public detail.
pub async fn get_restaurant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let restaurant = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        load_restaurant(&conn, &id)
    })
    .await??;

    Ok(success(
        "restaurant fetched",
        json!({ "restaurant": restaurant.snapshot() }),
    ))
}

/// PUT /api/restaurants/{id}/toggle-status — owner flips open/closed.
pub async fn toggle_status(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let restaurant = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        require_restaurant_owner(&conn, &id, &claims.sub)?;
        conn.execute(
            "UPDATE restaurants SET is_active = NOT is_active, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        load_restaurant(&conn, &id)
    })
    .await??;

    tracing::info!(
        restaurant_id = %restaurant.id,
        is_active = restaurant.is_active,
        "restaurant status toggled"
    );
    Ok(success(
        "status updated",
        json!({ "restaurant": restaurant.snapshot() }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningTimeRequest {
    pub opening_time: Option<String>,
}

/// PUT /api/restaurants/{id}/opening-time — schedule (or clear) the next
/// opening. A restaurant with a future opening time is closed until the
/// opening-time watcher flips it.
pub async fn set_opening_time(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(body): Json<OpeningTimeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let normalized = match body.opening_time {
        Some(raw) => Some(parse_opening_time(&raw)?.to_rfc3339()),
        None => None,
    };

    let db = state.db.clone();
    let restaurant = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        require_restaurant_owner(&conn, &id, &claims.sub)?;
        match &normalized {
            Some(opening) => {
                conn.execute(
                    "UPDATE restaurants SET opening_time = ?2, is_active = 0, updated_at = ?3 WHERE id = ?1",
                    params![id, opening, Utc::now().to_rfc3339()],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE restaurants SET opening_time = NULL, updated_at = ?2 WHERE id = ?1",
                    params![id, Utc::now().to_rfc3339()],
                )?;
            }
        }
        load_restaurant(&conn, &id)
    })
    .await??;

    Ok(success(
        "opening time updated",
        json!({ "restaurant": restaurant.snapshot() }),
    ))
}

fn parse_opening_time(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::Validation("openingTime must be an RFC 3339 timestamp".into()))
}

/// Flip restaurants whose scheduled opening time has passed from inactive
/// to active. Called by the scheduler's opening-time watcher.
pub fn open_due_restaurants(conn: &Connection) -> Result<Vec<String>, AppError> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT id, name FROM restaurants
         WHERE is_active = 0 AND opening_time IS NOT NULL AND opening_time <= ?1",
    )?;
    let due: Vec<(String, String)> = stmt
        .query_map(params![now], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();

    for (id, name) in &due {
        conn.execute(
            "UPDATE restaurants SET is_active = 1, opening_time = NULL, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        tracing::info!(restaurant_id = %id, name = %name, "restaurant opened on schedule");
    }

    Ok(due.into_iter().map(|(id, _)| id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::migrations;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrations().to_latest(&mut conn).unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, username, mobile_number, password_hash, role, created_at, updated_at)
             VALUES ('owner-1', 'o', '9999900001', 'x', 'restaurant', ?1, ?1)",
            params![now],
        )
        .unwrap();
        conn
    }

    #[test]
    fn past_opening_time_flips_restaurant_active() {
        let conn = test_conn();
        let now = Utc::now().to_rfc3339();
        let past = (Utc::now() - chrono::Duration::minutes(5)).to_rfc3339();
        conn.execute(
            "INSERT INTO restaurants (id, name, is_active, owner_id, opening_time, created_at, updated_at)
             VALUES ('r1', 'A', 0, 'owner-1', ?1, ?2, ?2)",
            params![past, now],
        )
        .unwrap();

        let opened = open_due_restaurants(&conn).unwrap();
        assert_eq!(opened, vec!["r1".to_string()]);

        let restaurant = load_restaurant(&conn, "r1").unwrap();
        assert!(restaurant.is_active);
        assert!(restaurant.opening_time.is_none());

        // Second pass is a no-op.
        assert!(open_due_restaurants(&conn).unwrap().is_empty());
    }

    #[test]
    fn future_opening_time_stays_closed() {
        let conn = test_conn();
        let now = Utc::now().to_rfc3339();
        let future = (Utc::now() + chrono::Duration::minutes(30)).to_rfc3339();
        conn.execute(
            "INSERT INTO restaurants (id, name, is_active, owner_id, opening_time, created_at, updated_at)
             VALUES ('r2', 'B', 0, 'owner-1', ?1, ?2, ?2)",
            params![future, now],
        )
        .unwrap();

        assert!(open_due_restaurants(&conn).unwrap().is_empty());
        assert!(!load_restaurant(&conn, "r2").unwrap().is_active);
    }
}

//! Per-user device token store.
//!
//! Each user owns up to 5 push endpoints; upserts merge info, bump
//! last-active and reset expiry, then apply the cap and the expiry purge
//! inside the same transaction. A legacy scalar token on the user row is
//! folded into the list on the first device-touching save.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;

use crate::auth::middleware::Claims;
use crate::db::models::{DeviceKind, DeviceRecord};
use crate::error::{success, AppError};
use crate::state::AppState;

/// The 5 most-recently-active devices are kept per user.
pub const MAX_DEVICES_PER_USER: usize = 5;

/// Tokens expire 30 days after their last upsert.
pub const TOKEN_TTL_DAYS: i64 = 30;

/// Fold a legacy scalar push token on the user row into the device list
/// (kind unknown, info {"migrated":"true"}), then clear it. Idempotent:
/// a second run sees a NULL column and does nothing.
pub fn migrate_legacy_token(conn: &Connection, user_id: &str) -> rusqlite::Result<()> {
    let legacy: Option<String> = conn.query_row(
        "SELECT legacy_push_token FROM users WHERE id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;

    let Some(token) = legacy.filter(|t| !t.is_empty()) else {
        return Ok(());
    };

    let now = Utc::now().to_rfc3339();
    let expires = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO devices (user_id, token, kind, info, last_active, expires_at)
         VALUES (?1, ?2, 'unknown', '{\"migrated\":\"true\"}', ?3, ?4)",
        params![user_id, token, now, expires],
    )?;
    conn.execute(
        "UPDATE users SET legacy_push_token = NULL, updated_at = ?2 WHERE id = ?1",
        params![user_id, now],
    )?;

    tracing::info!(user_id = %user_id, "migrated legacy push token into device list");
    Ok(())
}

/// Upsert one device record for a user. Runs as a single transaction:
/// expired records are purged, the token is merged or appended, and the
/// per-user cap is enforced by last-active recency.
pub fn upsert_device(
    conn: &mut Connection,
    user_id: &str,
    token: &str,
    kind: DeviceKind,
    info: &BTreeMap<String, String>,
) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    let expires = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).to_rfc3339();

    // Expired records are removed on every upsert.
    tx.execute(
        "DELETE FROM devices WHERE user_id = ?1 AND expires_at <= ?2",
        params![user_id, now],
    )?;

    let existing_info: Option<String> = tx
        .query_row(
            "SELECT info FROM devices WHERE user_id = ?1 AND token = ?2",
            params![user_id, token],
            |row| row.get(0),
        )
        .ok();

    match existing_info {
        Some(old_json) => {
            // Merge: keep old keys, new keys win.
            let mut merged: BTreeMap<String, String> =
                serde_json::from_str(&old_json).unwrap_or_default();
            merged.extend(info.iter().map(|(k, v)| (k.clone(), v.clone())));
            let merged_json = serde_json::to_string(&merged).unwrap_or_else(|_| "{}".into());

            tx.execute(
                "UPDATE devices SET kind = ?3, info = ?4, last_active = ?5, expires_at = ?6
                 WHERE user_id = ?1 AND token = ?2",
                params![user_id, token, kind.as_str(), merged_json, now, expires],
            )?;
        }
        None => {
            let info_json = serde_json::to_string(info).unwrap_or_else(|_| "{}".into());
            tx.execute(
                "INSERT INTO devices (user_id, token, kind, info, last_active, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![user_id, token, kind.as_str(), info_json, now, expires],
            )?;
        }
    }

    // Keep the 5 most-recently-active records.
    tx.execute(
        "DELETE FROM devices WHERE user_id = ?1 AND token NOT IN (
             SELECT token FROM devices WHERE user_id = ?1
             ORDER BY last_active DESC LIMIT ?2
         )",
        params![user_id, MAX_DEVICES_PER_USER as i64],
    )?;

    tx.commit()
}

/// Remove one token from a user's device list.
pub fn remove_token(conn: &Connection, user_id: &str, token: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM devices WHERE user_id = ?1 AND token = ?2",
        params![user_id, token],
    )
}

/// Active push tokens for a user, filtered by expiry.
pub fn active_tokens(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT token FROM devices WHERE user_id = ?1 AND expires_at > ?2
         ORDER BY last_active DESC",
    )?;
    let tokens = stmt
        .query_map(params![user_id, now], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(tokens)
}

/// All device records for a user, most recent first.
pub fn list_devices(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<DeviceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, token, kind, info, last_active, expires_at
         FROM devices WHERE user_id = ?1 ORDER BY last_active DESC",
    )?;
    let records = stmt
        .query_map(params![user_id], DeviceRecord::from_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(records)
}

/// Process-wide bulk purge of expired device records.
pub fn sweep_expired(conn: &Connection) -> rusqlite::Result<usize> {
    let now = Utc::now().to_rfc3339();
    conn.execute("DELETE FROM devices WHERE expires_at <= ?1", params![now])
}

// --- REST endpoint handlers ---

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub token: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

/// PUT /api/users/devices — register or refresh the caller's device.
pub async fn register_device(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<RegisterDeviceRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.token.is_empty() {
        return Err(AppError::Validation("device token must not be empty".into()));
    }
    let kind = DeviceKind::parse(body.kind.as_deref().unwrap_or("unknown"));

    let db = state.db.clone();
    let user_id = claims.sub.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock()?;
        migrate_legacy_token(&conn, &user_id)?;
        upsert_device(&mut conn, &user_id, &body.token, kind, &body.info)?;
        Ok::<_, AppError>(())
    })
    .await??;

    Ok(success("device registered", json!({})))
}

/// DELETE /api/users/devices/{token} — deregister one device.
pub async fn delete_device(
    State(state): State<AppState>,
    claims: Claims,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let removed = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        Ok::<_, AppError>(remove_token(&conn, &user_id, &token)?)
    })
    .await??;

    if removed == 0 {
        return Err(AppError::NotFound("device token not registered".into()));
    }
    Ok(success("device removed", json!({})))
}

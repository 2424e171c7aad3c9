//! User registration, login, token verification and role assignment.

use std::collections::BTreeMap;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::accounts::devices;
use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::db::models::{DeviceKind, Role, User};
use crate::error::{success, AppError};
use crate::state::AppState;

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}").into()))
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn validate_mobile(mobile: &str) -> Result<(), AppError> {
    if mobile.len() != 10 || !mobile.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "mobileNumber must be exactly 10 digits".into(),
        ));
    }
    Ok(())
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<User, AppError> {
    let user = conn
        .query_row(
            "SELECT * FROM users WHERE id = ?1",
            params![user_id],
            User::from_row,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;
    Ok(user)
}

// --- REST endpoint handlers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub mobile_number: String,
    pub password: String,
}

/// POST /api/users/register — create an account and return a bearer token.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if body.username.trim().is_empty() {
        return Err(AppError::Validation("username must not be empty".into()));
    }
    validate_mobile(&body.mobile_number)?;
    if body.password.len() < 6 {
        return Err(AppError::Validation(
            "password must be at least 6 characters".into(),
        ));
    }

    let password_hash = hash_password(&body.password)?;
    let insert_id = Uuid::now_v7().to_string();

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        let now = Utc::now().to_rfc3339();
        let inserted = conn.execute(
            "INSERT INTO users (id, username, mobile_number, password_hash, role, address, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'user', '', ?5, ?5)",
            params![insert_id, body.username.trim(), body.mobile_number, password_hash, now],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(AppError::Conflict("mobile number already registered".into()));
            }
            Err(err) => return Err(err.into()),
        }
        load_user(&conn, &insert_id)
    })
    .await??;

    let token = jwt::issue_access_token(&state.jwt_secret, &user.id, user.role)
        .map_err(AppError::internal)?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((
        StatusCode::CREATED,
        success(
            "registered successfully",
            json!({ "token": token, "user": user.snapshot() }),
        ),
    ))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginDevice {
    pub token: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub mobile_number: String,
    pub password: String,
    /// Optional device registration piggybacked on login.
    #[serde(default)]
    pub device: Option<LoginDevice>,
}

/// POST /api/users/login — verify credentials, optionally upsert the
/// calling device, and return a bearer token plus a user snapshot.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_mobile(&body.mobile_number)?;

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock()?;
        let found: Option<(String, String)> = conn
            .query_row(
                "SELECT id, password_hash FROM users WHERE mobile_number = ?1",
                params![body.mobile_number],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        // Same rejection for unknown number and bad password.
        let Some((user_id, stored_hash)) = found else {
            return Err(AppError::Unauthorized);
        };
        if !verify_password(&body.password, &stored_hash) {
            return Err(AppError::Unauthorized);
        }

        if let Some(device) = &body.device {
            if !device.token.is_empty() {
                devices::migrate_legacy_token(&conn, &user_id)?;
                devices::upsert_device(
                    &mut conn,
                    &user_id,
                    &device.token,
                    DeviceKind::parse(device.kind.as_deref().unwrap_or("unknown")),
                    &device.info,
                )?;
            }
        }

        load_user(&conn, &user_id)
    })
    .await??;

    if !user.is_active {
        return Err(AppError::Forbidden("account is deactivated".into()));
    }

    let token = jwt::issue_access_token(&state.jwt_secret, &user.id, user.role)
        .map_err(AppError::internal)?;

    tracing::info!(user_id = %user.id, "user logged in");
    Ok(success(
        "logged in successfully",
        json!({ "token": token, "user": user.snapshot() }),
    ))
}

/// GET /api/users/verify-token — resolve the bearer token to a fresh snapshot.
pub async fn verify_token(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock()?;
        load_user(&conn, &claims.sub)
    })
    .await??;

    Ok(success("token valid", json!({ "user": user.snapshot() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub device_token: Option<String>,
}

/// POST /api/users/logout — tokens are stateless; an optionally supplied
/// device token is deregistered so the device stops receiving pushes.
pub async fn logout(
    State(state): State<AppState>,
    claims: Claims,
    body: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let device_token = body.ok().and_then(|Json(b)| b.device_token);

    if let Some(token) = device_token.filter(|t| !t.is_empty()) {
        let db = state.db.clone();
        let user_id = claims.sub.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock()?;
            devices::remove_token(&conn, &user_id, &token)?;
            Ok::<_, AppError>(())
        })
        .await??;
    }

    Ok(success("logged out", json!({})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleRequest {
    pub role: String,
    #[serde(default)]
    pub restaurant_id: Option<String>,
}

/// POST /api/users/{id}/assign-role — admin only. Role and the matching
/// restaurant owner reference are written in one transaction so the two
/// foreign keys can never disagree.
pub async fn assign_role(
    State(state): State<AppState>,
    claims: Claims,
    Path(user_id): Path<String>,
    Json(body): Json<AssignRoleRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if claims.role != Role::Admin {
        return Err(AppError::Forbidden("admin role required".into()));
    }
    let new_role =
        Role::parse(&body.role).ok_or_else(|| AppError::Validation("unknown role".into()))?;

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let mut conn = db.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let target = tx
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![user_id],
                User::from_row,
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound("user not found".into()))?;

        match new_role {
            Role::Restaurant => {
                let restaurant_id = body
                    .restaurant_id
                    .ok_or_else(|| AppError::Validation("restaurantId is required".into()))?;
                let prev_owner: String = tx
                    .query_row(
                        "SELECT owner_id FROM restaurants WHERE id = ?1",
                        params![restaurant_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| AppError::NotFound("restaurant not found".into()))?;

                if prev_owner != target.id {
                    tx.execute(
                        "UPDATE users SET role = 'user', restaurant_id = NULL, updated_at = ?2 WHERE id = ?1",
                        params![prev_owner, now],
                    )?;
                }
                tx.execute(
                    "UPDATE restaurants SET owner_id = ?1, updated_at = ?3 WHERE id = ?2",
                    params![target.id, restaurant_id, now],
                )?;
                tx.execute(
                    "UPDATE users SET role = 'restaurant', restaurant_id = ?2, updated_at = ?3 WHERE id = ?1",
                    params![target.id, restaurant_id, now],
                )?;
            }
            Role::User | Role::Admin => {
                // A restaurant must not be left ownerless.
                if target.restaurant_id.is_some() {
                    return Err(AppError::Conflict(
                        "user still owns a restaurant; reassign it first".into(),
                    ));
                }
                tx.execute(
                    "UPDATE users SET role = ?2, restaurant_id = NULL, updated_at = ?3 WHERE id = ?1",
                    params![target.id, new_role.as_str(), now],
                )?;
            }
        }

        let updated = tx.query_row(
            "SELECT * FROM users WHERE id = ?1",
            params![target.id],
            User::from_row,
        )?;
        tx.commit()?;
        Ok::<_, AppError>(updated)
    })
    .await??;

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "role assigned");
    Ok(success("role assigned", json!({ "user": user.snapshot() })))
}

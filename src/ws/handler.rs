use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use rusqlite::OptionalExtension;
use serde::Deserialize;

use crate::auth::jwt;
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::registry::{CLOSE_AUTH_FAILURE, CLOSE_FORBIDDEN};

/// Query parameters for the dashboard channel. All optional so that a
/// missing parameter is answered with close code 4001 rather than a 400
/// before the upgrade.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "restaurantId")]
    pub restaurant_id: Option<String>,
    pub token: Option<String>,
}

/// GET /ws?userId=..&restaurantId=..&token=..
/// Dashboard channel upgrade. On rejection the connection is upgraded and
/// immediately closed with the typed close code (4001 auth, 4003 forbidden)
/// so clients can distinguish the failure without an HTTP error path.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match authorize(&state, params).await {
        Ok((user_id, restaurant_id)) => ws.on_upgrade(move |socket| {
            actor::run_dashboard(socket, state, user_id, restaurant_id)
        }),
        Err((close_code, reason)) => {
            tracing::warn!(close_code, reason, "dashboard channel rejected");
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

/// Resolve the attach parameters to an authenticated restaurant owner.
async fn authorize(
    state: &AppState,
    params: WsAuthQuery,
) -> Result<(String, String), (u16, &'static str)> {
    let (Some(user_id), Some(restaurant_id), Some(token)) =
        (params.user_id, params.restaurant_id, params.token)
    else {
        return Err((CLOSE_AUTH_FAILURE, "missing parameters"));
    };

    let claims = jwt::validate_access_token(&state.jwt_secret, &token)
        .map_err(|_| (CLOSE_AUTH_FAILURE, "invalid or expired token"))?;
    if claims.sub != user_id {
        return Err((CLOSE_AUTH_FAILURE, "token does not match user"));
    }

    let db = state.db.clone();
    let rid = restaurant_id.clone();
    let owner_id: Option<String> = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT owner_id FROM restaurants WHERE id = ?1",
            rusqlite::params![rid],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten()
    })
    .await
    .unwrap_or(None);

    match owner_id {
        Some(owner) if owner == user_id => Ok((user_id, restaurant_id)),
        _ => Err((CLOSE_FORBIDDEN, "not the restaurant owner")),
    }
}

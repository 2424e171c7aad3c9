use axum::{middleware, Json, Router};
use chrono::Utc;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::accounts::{devices, registration};
use crate::auth::middleware::JwtSecret;
use crate::orders::handlers as order_handlers;
use crate::restaurants::{crud as restaurant_crud, menu};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on credential endpoints: 5 requests per minute per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Credential routes with rate limiting
    let auth_routes = Router::new()
        .route(
            "/api/users/register",
            axum::routing::post(registration::register),
        )
        .route("/api/users/login", axum::routing::post(registration::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Authenticated account routes (Claims extractor validates the token)
    let account_routes = Router::new()
        .route(
            "/api/users/verify-token",
            axum::routing::get(registration::verify_token),
        )
        .route(
            "/api/users/logout",
            axum::routing::post(registration::logout),
        )
        .route(
            "/api/users/devices",
            axum::routing::put(devices::register_device),
        )
        .route(
            "/api/users/devices/{token}",
            axum::routing::delete(devices::delete_device),
        )
        .route(
            "/api/users/{id}/assign-role",
            axum::routing::post(registration::assign_role),
        );

    // Order lifecycle routes.
    // Note: /api/orders/restaurant/{id} MUST come before /api/orders/{id}/...
    // path params are disjoint here, but keep the grouping explicit.
    let order_routes = Router::new()
        .route(
            "/api/orders",
            axum::routing::post(order_handlers::create_order)
                .get(order_handlers::list_my_orders),
        )
        .route(
            "/api/orders/restaurant/{restaurantId}",
            axum::routing::get(order_handlers::list_restaurant_orders),
        )
        .route(
            "/api/orders/{id}/confirm",
            axum::routing::patch(order_handlers::confirm_order),
        )
        .route(
            "/api/orders/{id}/ready",
            axum::routing::patch(order_handlers::ready_order),
        )
        .route(
            "/api/orders/{id}/deliver",
            axum::routing::patch(order_handlers::deliver_order),
        )
        .route(
            "/api/orders/{id}/cancel",
            axum::routing::patch(order_handlers::cancel_order),
        );

    // Restaurant routes: listing and menus are public, mutations are
    // owner-guarded inside the handlers.
    let restaurant_routes = Router::new()
        .route(
            "/api/restaurants",
            axum::routing::get(restaurant_crud::list_restaurants)
                .post(restaurant_crud::create_restaurant),
        )
        .route(
            "/api/restaurants/{id}",
            axum::routing::get(restaurant_crud::get_restaurant),
        )
        .route(
            "/api/restaurants/{id}/toggle-status",
            axum::routing::put(restaurant_crud::toggle_status),
        )
        .route(
            "/api/restaurants/{id}/opening-time",
            axum::routing::put(restaurant_crud::set_opening_time),
        )
        .route(
            "/api/restaurants/{id}/menu",
            axum::routing::get(menu::get_menu)
                .put(menu::replace_menu)
                .post(menu::add_item),
        )
        .route(
            "/api/restaurants/{id}/menu/{itemId}",
            axum::routing::put(menu::update_item).delete(menu::delete_item),
        );

    // Dashboard channel endpoint (auth via query params, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/api/health", axum::routing::get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(account_routes)
        .merge(order_routes)
        .merge(restaurant_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// GET /api/health
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

mod accounts;
mod auth;
mod config;
mod db;
mod error;
mod notify;
mod orders;
mod restaurants;
mod routes;
mod scheduler;
mod state;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use config::{generate_config_template, Config, PushConfig};
use notify::dispatcher::{Dispatcher, RetryPolicy};
use notify::push::{DisabledPushProvider, HttpPushProvider, PushProvider};
use state::{AppState, Timings};
use ws::ChannelRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "quickbite_server=info,audit=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "quickbite_server=info,audit=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("quickbite server v{} starting", env!("CARGO_PKG_VERSION"));

    // Open the store; retry with bounded backoff, then give up and exit.
    let db = match db::init_db_with_retry(&config.data_dir, 5).await {
        Ok(db) => db,
        Err(err) => {
            tracing::error!(error = %err, "store unreachable at startup, exiting");
            std::process::exit(1);
        }
    };

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Live dashboard channel registry (process-local; clients reconnect
    // after a restart).
    let channels = ChannelRegistry::new();

    // Push provider: HTTP client when configured, otherwise a disabled
    // provider that degrades delivery to the dashboard channel.
    let push_config = config.push.clone().unwrap_or_default();
    let provider: Arc<dyn PushProvider> = build_push_provider(&push_config)?;

    let dispatcher = Dispatcher::new(
        db.clone(),
        channels.clone(),
        provider,
        RetryPolicy::from_config(&push_config),
        push_config.batch_size,
    );

    let timing_config = config.timing.clone().unwrap_or_default();
    let app_state = AppState {
        db,
        jwt_secret,
        channels,
        dispatcher,
        timings: Timings::from_config(&timing_config),
    };

    // Background jobs: heartbeat, token sweep, auto-cancel watchdog
    // (immediate first pass = crash recovery), opening-time watcher.
    scheduler::spawn_all(app_state.clone());

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn build_push_provider(
    push_config: &PushConfig,
) -> Result<Arc<dyn PushProvider>, Box<dyn std::error::Error>> {
    if push_config.enabled && !push_config.endpoint.is_empty() {
        tracing::info!(endpoint = %push_config.endpoint, "push delivery enabled");
        Ok(Arc::new(HttpPushProvider::new(push_config)?))
    } else {
        tracing::warn!("push delivery not configured, dashboard channel only");
        Ok(Arc::new(DisabledPushProvider))
    }
}

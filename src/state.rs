use std::sync::Arc;
use std::time::Duration;

use crate::config::TimingConfig;
use crate::db::DbPool;
use crate::notify::Dispatcher;
use crate::ws::ChannelRegistry;

/// Resolved background-job cadences and the auto-cancel deadline.
#[derive(Debug, Clone)]
pub struct Timings {
    pub heartbeat: Duration,
    pub token_sweep: Duration,
    pub auto_cancel: Duration,
    pub watchdog: Duration,
    pub opening_watch: Duration,
}

impl Timings {
    pub fn from_config(config: &TimingConfig) -> Self {
        Self {
            heartbeat: Duration::from_secs(config.heartbeat_secs),
            token_sweep: Duration::from_secs(config.token_sweep_secs),
            auto_cancel: Duration::from_secs(config.auto_cancel_secs),
            watchdog: Duration::from_secs(config.watchdog_secs),
            opening_watch: Duration::from_secs(config.opening_watch_secs),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default())
    }
}

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Live dashboard channels, keyed by restaurant id
    pub channels: Arc<ChannelRegistry>,
    /// Order event fan-out
    pub dispatcher: Arc<Dispatcher>,
    /// Background-job cadences
    pub timings: Timings,
}

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// quickbite food-ordering server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "quickbite-server", version, about = "quickbite food-ordering server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "QUICKBITE_PORT", default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "QUICKBITE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./quickbite.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "QUICKBITE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "QUICKBITE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Push delivery configuration (loaded from [push] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub push: Option<PushConfig>,

    /// Background-job cadence configuration (loaded from [timing] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub timing: Option<TimingConfig>,
}

/// Configuration for the push-delivery provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Whether push delivery is enabled (default: false — sends are skipped)
    #[serde(default)]
    pub enabled: bool,

    /// HTTP endpoint of the push provider
    #[serde(default)]
    pub endpoint: String,

    /// Bearer key presented to the provider
    #[serde(default)]
    pub api_key: String,

    /// Per-attempt send timeout in seconds (default: 10)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Base delay for the exponential retry backoff, in milliseconds (default: 2000)
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Maximum send attempts per token (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum messages per provider batch call (default: 500)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key: String::new(),
            send_timeout_secs: 10,
            retry_base_ms: 2000,
            max_attempts: 3,
            batch_size: 500,
        }
    }
}

fn default_send_timeout() -> u64 {
    10
}

fn default_retry_base_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_batch_size() -> usize {
    500
}

/// Cadence of the background jobs and the auto-cancel deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Dashboard heartbeat sweep interval in seconds (default: 30)
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,

    /// Expired device-token sweep interval in seconds (default: 21600 = 6 hours)
    #[serde(default = "default_token_sweep")]
    pub token_sweep_secs: u64,

    /// Deadline after which an unaccepted order is auto-cancelled, in seconds
    /// (default: 480 = 8 minutes)
    #[serde(default = "default_auto_cancel")]
    pub auto_cancel_secs: u64,

    /// Auto-cancel watchdog interval in seconds (default: 60)
    #[serde(default = "default_watchdog")]
    pub watchdog_secs: u64,

    /// Restaurant opening-time watcher interval in seconds (default: 60)
    #[serde(default = "default_opening_watch")]
    pub opening_watch_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            token_sweep_secs: 21_600,
            auto_cancel_secs: 480,
            watchdog_secs: 60,
            opening_watch_secs: 60,
        }
    }
}

fn default_heartbeat() -> u64 {
    30
}

fn default_token_sweep() -> u64 {
    21_600
}

fn default_auto_cancel() -> u64 {
    480
}

fn default_watchdog() -> u64 {
    60
}

fn default_opening_watch() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
            config: "./quickbite.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            push: None,
            timing: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (QUICKBITE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("QUICKBITE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# quickbite server configuration
# Place this file at ./quickbite.toml or specify with --config <path>
# All settings can be overridden via environment variables (QUICKBITE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# ---- Push Delivery ----
# [push]

# Enable push delivery. When false, push sends are skipped and only the
# dashboard channel carries notifications.
# enabled = false

# HTTP endpoint and bearer key of the push provider
# endpoint = ""
# api_key = ""

# Per-attempt send timeout in seconds (default: 10)
# send_timeout_secs = 10

# Exponential retry backoff base in milliseconds (default: 2000 -> 2s, 4s, 8s)
# retry_base_ms = 2000

# Maximum send attempts per device token (default: 3)
# max_attempts = 3

# Maximum messages per provider batch call (default: 500)
# batch_size = 500

# ---- Background Jobs ----
# [timing]

# Dashboard heartbeat sweep interval in seconds (default: 30)
# heartbeat_secs = 30

# Expired device-token sweep interval in seconds (default: 21600 = 6 hours)
# token_sweep_secs = 21600

# Deadline for an unaccepted order before auto-cancel, in seconds (default: 480)
# auto_cancel_secs = 480

# Auto-cancel watchdog interval in seconds (default: 60)
# watchdog_secs = 60

# Restaurant opening-time watcher interval in seconds (default: 60)
# opening_watch_secs = 60
"#
    .to_string()
}

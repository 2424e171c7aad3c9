pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Type alias for the shared database connection.
/// rusqlite is synchronous — we wrap in Arc<Mutex> for thread safety
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    // Ensure data directory exists
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("quickbite.db");
    let mut conn = Connection::open(&db_path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Enable foreign key enforcement
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Bound how long a statement waits on a busy database
    conn.busy_timeout(Duration::from_secs(45))?;

    // Run migrations
    let migrations = migrations::migrations();
    migrations.to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Open the store with bounded exponential backoff. Startup is the only
/// moment we retry-then-exit; at steady state store faults surface as 503.
pub async fn init_db_with_retry(
    data_dir: &str,
    attempts: u32,
) -> Result<DbPool, Box<dyn std::error::Error>> {
    let mut delay = Duration::from_millis(500);
    let mut last_err: Option<Box<dyn std::error::Error>> = None;

    for attempt in 1..=attempts {
        match init_db(data_dir) {
            Ok(pool) => return Ok(pool),
            Err(err) => {
                tracing::warn!(
                    attempt,
                    error = %err,
                    "store unavailable, retrying in {:?}",
                    delay
                );
                last_err = Some(err);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| "store unreachable".into()))
}

//! Environment-driven configuration
//!
//! All knobs come from the environment (with `.env` support via dotenvy) and
//! fall back to sensible defaults, matching how the server binary has always
//! been configured.

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Address the HTTP server binds to
    pub bind_addr: SocketAddr,
    /// Connection pool size
    pub pg_max_connections: u32,
    /// Rows accumulated per bulk-insert flush
    pub import_batch_size: usize,
    /// Upload size cap for the import endpoint, in bytes
    pub import_max_bytes: usize,
    /// Wall-clock bound on a bulk import or export run
    pub bulk_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost:5432/riskledger".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            pg_max_connections: 10,
            import_batch_size: 5_000,
            import_max_bytes: 50 * 1024 * 1024,
            bulk_timeout_secs: 600,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: env_parsed("BIND_ADDR", defaults.bind_addr),
            pg_max_connections: env_parsed("PG_MAX_CONNECTIONS", defaults.pg_max_connections),
            import_batch_size: env_parsed("IMPORT_BATCH_SIZE", defaults.import_batch_size)
                .max(1),
            import_max_bytes: env_parsed("IMPORT_MAX_BYTES", defaults.import_max_bytes),
            bulk_timeout_secs: env_parsed("BULK_TIMEOUT_SECS", defaults.bulk_timeout_secs),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("ignoring unparsable {key}={raw}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

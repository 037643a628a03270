//! Riskledger REST API Server
//!
//! Serves faceted entity listing, CRUD, metadata catalog administration, and
//! bulk CSV exchange over HTTP.
//!
//! ```bash
//! # Start the server
//! DATABASE_URL=postgresql://localhost/riskledger cargo run --bin registry_server --features server
//! ```

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use riskledger::api::create_router;
use riskledger::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "riskledger=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env();

    info!("Connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(config.pg_max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let addr = config.bind_addr;
    let app = create_router(pool, config);

    info!("Server running on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

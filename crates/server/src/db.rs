use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use conduit_core::config::PostgresConfig;

const CONNECT_ATTEMPTS: u32 = 15;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Create the PostgreSQL pool, retrying while the database comes up.
/// The schema is expected to exist already.
pub async fn connect(config: &PostgresConfig) -> anyhow::Result<PgPool> {
    let url = config.connection_string();
    let mut attempt = 1;
    loop {
        let result = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&url)
            .await;
        match result {
            Ok(pool) => {
                info!(host = %config.host, database = %config.database, "PostgreSQL connected");
                return Ok(pool);
            }
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(
                    attempt,
                    error = %e,
                    "PostgreSQL not reachable, retrying in {:?}", CONNECT_BACKOFF
                );
                tokio::time::sleep(CONNECT_BACKOFF).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to connect to PostgreSQL after {CONNECT_ATTEMPTS} attempts")
                });
            }
        }
    }
}

//! Connection pool setup for the two endpoints.

use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Executor;
use tracing::info;

use crate::config::EndpointConfig;
use crate::error::Result;

/// Pool sizing applied to both endpoints.
const MAX_CONNECTIONS: u32 = 25;
const MAX_LIFETIME: Duration = Duration::from_secs(300);
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Open a bounded pool against one endpoint and verify connectivity.
///
/// Every pooled connection gets its `group_concat_max_len` session variable
/// raised so chunk-level `GROUP_CONCAT` aggregates do not truncate.
pub async fn connect(endpoint: &EndpointConfig, label: &str) -> Result<MySqlPool> {
    let options = MySqlConnectOptions::new()
        .host(&endpoint.host)
        .port(endpoint.port)
        .database(&endpoint.dbname)
        .username(&endpoint.username)
        .password(&endpoint.password);

    let pool = MySqlPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .max_lifetime(MAX_LIFETIME)
        .idle_timeout(IDLE_TIMEOUT)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET SESSION group_concat_max_len = 1000000")
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    info!(
        "connected to {} endpoint {}:{}/{}",
        label, endpoint.host, endpoint.port, endpoint.dbname
    );

    Ok(pool)
}

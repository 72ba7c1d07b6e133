// =============================================================================
// Database bootstrap — pool, vector extension, migrations
// =============================================================================
//
// One shared PgPool (max 8 connections) is the only gateway to durable
// state. Startup refuses to proceed on an unreachable database or a failed
// migration; `main` maps that refusal to exit code 3.
// =============================================================================

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::{MeridianError, Result};

const MAX_CONNECTIONS: u32 = 8;
const ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Connect, enable pgvector, run embedded migrations, and sanity-probe the
/// schema. Every failure here is fatal configuration.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect(database_url)
        .await
        .map_err(|e| MeridianError::Config(format!("cannot connect to database: {e}")))?;

    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(&pool)
        .await
        .map_err(|e| MeridianError::Config(format!("pgvector extension unavailable: {e}")))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| MeridianError::Config(format!("migration failed: {e}")))?;

    // Schema probe: a mismatch between the binary and the database should
    // stop the process before any job runs.
    sqlx::query("SELECT 1 FROM quotes LIMIT 1")
        .fetch_optional(&pool)
        .await
        .map_err(|e| MeridianError::Config(format!("schema probe failed: {e}")))?;

    info!(max_connections = MAX_CONNECTIONS, "database ready");
    Ok(pool)
}

/// Seed the CASH row when the portfolio is empty. Idempotent.
pub async fn seed_cash(pool: &PgPool, initial_cash_usd: f64) -> Result<()> {
    let inserted = sqlx::query(
        "INSERT INTO portfolio_state (ticker, quantity, avg_entry_price, last_updated)
         VALUES ('CASH', $1, 1, now())
         ON CONFLICT (ticker) DO NOTHING",
    )
    .bind(initial_cash_usd)
    .execute(pool)
    .await?;

    if inserted.rows_affected() > 0 {
        info!(initial_cash_usd, "CASH row seeded");
    }
    Ok(())
}

//! pve-db
//!
//! Persistence for scan point versions, scan events, ingest responses,
//! outcomes, rounds and sweep watermarks.
//!
//! [`PatrolStore`] is the seam the runtime writes through. [`MemoryStore`]
//! backs tests and batch replay; [`PgStore`] backs the daemon.

mod error;
mod memory;
mod pg;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::{PatrolStore, ScanCommit, StoredState, SweepCommit};

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "PVE_DATABASE_URL";

/// Connect to Postgres at `url`.
pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Connect using the URL held in env var `var` (normally [`ENV_DB_URL`]).
pub async fn connect_from_env(var: &str) -> Result<PgPool> {
    let url = std::env::var(var).with_context(|| format!("missing env var {var}"))?;
    connect(&url).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_outcomes_table: bool,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='scan_outcomes'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_outcomes_table: exists,
    })
}

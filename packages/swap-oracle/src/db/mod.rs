use async_trait::async_trait;
use bridge_core::{BridgeError, BridgeRole, ScanCursorStore};
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Get a persisted scan cursor
pub async fn get_scan_cursor(pool: &PgPool, role: &str, kind: &str) -> Result<Option<u64>> {
    let row: Option<(i64,)> =
        sqlx::query_as(r#"SELECT value FROM scan_cursors WHERE role = $1 AND kind = $2"#)
            .bind(role)
            .bind(kind)
            .fetch_optional(pool)
            .await
            .wrap_err("Failed to get scan cursor")?;

    row.map(|r| u64::try_from(r.0).map_err(|_| eyre!("negative scan cursor {} for {}/{}", r.0, role, kind)))
        .transpose()
}

/// Advance a scan cursor. A lower value than the stored one leaves the row unchanged.
pub async fn update_scan_cursor(pool: &PgPool, role: &str, kind: &str, value: u64) -> Result<()> {
    let value = i64::try_from(value).map_err(|_| eyre!("scan cursor {} out of range", value))?;
    sqlx::query(
        r#"
        INSERT INTO scan_cursors (role, kind, value)
        VALUES ($1, $2, $3)
        ON CONFLICT (role, kind) DO UPDATE
            SET value = GREATEST(scan_cursors.value, EXCLUDED.value), updated_at = NOW()
        "#,
    )
    .bind(role)
    .bind(kind)
    .bind(value)
    .execute(pool)
    .await
    .wrap_err_with(|| format!("Failed to update scan cursor {}/{}", role, kind))?;

    Ok(())
}

/// Postgres-backed scan cursors.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanCursorStore for PgCursorStore {
    async fn load(&self, role: BridgeRole, key: &str) -> bridge_core::Result<Option<u64>> {
        get_scan_cursor(&self.pool, role.as_str(), key)
            .await
            .map_err(|e| BridgeError::Storage(format!("{:#}", e)))
    }

    async fn store(&self, role: BridgeRole, key: &str, value: u64) -> bridge_core::Result<()> {
        update_scan_cursor(&self.pool, role.as_str(), key, value)
            .await
            .map_err(|e| BridgeError::Storage(format!("{:#}", e)))?;
        debug!(%role, key, value, "Scan cursor persisted");
        Ok(())
    }
}

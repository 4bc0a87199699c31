//! PostgreSQL store.
//!
//! One table per use case, each with `UNIQUE (organization_id, string)`.
//! Creation is `INSERT ... ON CONFLICT DO NOTHING` followed by a re-read, so
//! any number of concurrent writers converge on the id of whichever insert
//! won.

use ::async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use std::time::Duration;
use strindex_core::{
    IndexId, IndexerResult, KeyCollection, KeyResult, OrgId, StoreError, UseCaseKey,
};
use tokio_postgres::NoTls;

use crate::store::{stale_cutoff, StringStore};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait, connect and recycle timeout
    pub timeout: Duration,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "strindex".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// Reads `STRINDEX_DB_HOST`, `STRINDEX_DB_PORT`, `STRINDEX_DB_NAME`,
    /// `STRINDEX_DB_USER`, `STRINDEX_DB_PASSWORD`, `STRINDEX_DB_POOL_SIZE`
    /// and `STRINDEX_DB_TIMEOUT` (seconds).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("STRINDEX_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("STRINDEX_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("STRINDEX_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("STRINDEX_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("STRINDEX_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("STRINDEX_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("STRINDEX_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> IndexerResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut timeouts = Timeouts::new();
        timeouts.wait = Some(self.timeout);
        timeouts.create = Some(self.timeout);
        timeouts.recycle = Some(self.timeout);
        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts = timeouts;
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Unavailable {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// SQL
// ============================================================================

/// Table holding the mappings of a use case.
pub fn table_name(use_case_id: UseCaseKey) -> &'static str {
    match use_case_id {
        UseCaseKey::ReleaseHealth => "strindex_release_health",
        UseCaseKey::Performance => "strindex_performance",
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGSERIAL PRIMARY KEY,
            organization_id BIGINT NOT NULL,
            string TEXT NOT NULL,
            date_added TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (organization_id, string)
        );
        CREATE INDEX IF NOT EXISTS {table}_last_seen_idx ON {table} (last_seen);"
    )
}

fn select_keys_sql(table: &str) -> String {
    format!(
        "SELECT t.organization_id, t.string, t.id
         FROM {table} t
         JOIN UNNEST($1::BIGINT[], $2::TEXT[]) AS k(organization_id, string)
           ON t.organization_id = k.organization_id AND t.string = k.string"
    )
}

fn insert_keys_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (organization_id, string, last_seen)
         SELECT k.organization_id, k.string, $3
         FROM UNNEST($1::BIGINT[], $2::TEXT[]) AS k(organization_id, string)
         ON CONFLICT (organization_id, string) DO NOTHING"
    )
}

fn touch_keys_sql(table: &str) -> String {
    format!(
        "UPDATE {table} t
         SET last_seen = $3
         FROM UNNEST($1::BIGINT[], $2::TEXT[]) AS k(organization_id, string)
         WHERE t.organization_id = k.organization_id
           AND t.string = k.string
           AND t.last_seen < $4"
    )
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn to_db_id(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::InvalidId {
        value: value.to_string(),
        target: "BIGINT".to_string(),
    })
}

fn from_db_id(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidId {
        value: value.to_string(),
        target: "u64".to_string(),
    })
}

fn query_failed(operation: &str) -> impl FnOnce(tokio_postgres::Error) -> StoreError + '_ {
    move |e| StoreError::QueryFailed {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

/// Split a collection into the two parallel arrays bound to `UNNEST`,
/// sorted so concurrent writers take row locks in the same order.
fn key_arrays(keys: &KeyCollection) -> Result<(Vec<i64>, Vec<String>), StoreError> {
    let mut tuples = keys.as_tuples();
    tuples.sort_unstable();

    let mut org_ids = Vec::with_capacity(tuples.len());
    let mut strings = Vec::with_capacity(tuples.len());
    for (org_id, string) in tuples {
        org_ids.push(to_db_id(org_id)?);
        strings.push(string.to_string());
    }
    Ok((org_ids, strings))
}

fn row_to_key_result(row: &tokio_postgres::Row) -> Result<KeyResult, StoreError> {
    let org_id: i64 = row.get(0);
    let string: String = row.get(1);
    let id: i64 = row.get(2);
    Ok(KeyResult::new(from_db_id(org_id)?, string, Some(from_db_id(id)?)))
}

// ============================================================================
// STORE
// ============================================================================

/// PostgreSQL-backed [`StringStore`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Create a new store with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new store from configuration.
    pub fn from_config(config: &PgConfig) -> IndexerResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Create the tables of every use case if they do not exist.
    pub async fn migrate(&self) -> IndexerResult<()> {
        let conn = self.get_conn().await?;
        for use_case in UseCaseKey::ALL {
            conn.batch_execute(&create_table_sql(table_name(use_case)))
                .await
                .map_err(query_failed("migrate"))?;
        }
        tracing::debug!("strindex tables migrated");
        Ok(())
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> IndexerResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            StoreError::Unavailable {
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn select_keys(
        &self,
        conn: &deadpool_postgres::Object,
        use_case_id: UseCaseKey,
        org_ids: &[i64],
        strings: &[String],
    ) -> IndexerResult<Vec<KeyResult>> {
        let rows = conn
            .query(&select_keys_sql(table_name(use_case_id)), &[&org_ids, &strings])
            .await
            .map_err(query_failed("bulk_lookup"))?;

        rows.iter()
            .map(|row| row_to_key_result(row).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl StringStore for PostgresStore {
    async fn bulk_lookup(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> IndexerResult<Vec<KeyResult>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let (org_ids, strings) = key_arrays(keys)?;
        let conn = self.get_conn().await?;
        self.select_keys(&conn, use_case_id, &org_ids, &strings).await
    }

    async fn bulk_create_if_absent(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
    ) -> IndexerResult<Vec<KeyResult>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let (org_ids, strings) = key_arrays(keys)?;
        let conn = self.get_conn().await?;

        let inserted = conn
            .execute(
                &insert_keys_sql(table_name(use_case_id)),
                &[&org_ids, &strings, &Utc::now()],
            )
            .await
            .map_err(query_failed("bulk_create_if_absent"))?;

        let results = self
            .select_keys(&conn, use_case_id, &org_ids, &strings)
            .await?;

        tracing::debug!(
            use_case = %use_case_id,
            requested = keys.size(),
            inserted,
            "bulk create"
        );

        // A concurrent purge between insert and re-read is the only way to
        // lose a key here.
        if results.len() != keys.size() {
            return Err(StoreError::QueryFailed {
                operation: "bulk_create_if_absent".to_string(),
                reason: format!(
                    "{} of {} keys missing after insert",
                    keys.size() - results.len(),
                    keys.size()
                ),
            }
            .into());
        }
        Ok(results)
    }

    async fn touch(
        &self,
        use_case_id: UseCaseKey,
        keys: &KeyCollection,
        seen_at: DateTime<Utc>,
        stale_after: Duration,
    ) -> IndexerResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let (org_ids, strings) = key_arrays(keys)?;
        let cutoff = stale_cutoff(seen_at, stale_after);
        let conn = self.get_conn().await?;

        let touched = conn
            .execute(
                &touch_keys_sql(table_name(use_case_id)),
                &[&org_ids, &strings, &seen_at, &cutoff],
            )
            .await
            .map_err(query_failed("touch"))?;
        Ok(touched)
    }

    async fn lookup(
        &self,
        use_case_id: UseCaseKey,
        org_id: OrgId,
        string: &str,
    ) -> IndexerResult<Option<IndexId>> {
        let org_id = to_db_id(org_id)?;
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT id FROM {} WHERE organization_id = $1 AND string = $2",
            table_name(use_case_id)
        );

        let row = conn
            .query_opt(&sql, &[&org_id, &string])
            .await
            .map_err(query_failed("lookup"))?;

        match row {
            Some(row) => Ok(Some(from_db_id(row.get(0))?)),
            None => Ok(None),
        }
    }

    async fn reverse_lookup(
        &self,
        use_case_id: UseCaseKey,
        id: IndexId,
    ) -> IndexerResult<Option<String>> {
        // Ids outside the BIGINT range were never handed out.
        let Ok(id) = to_db_id(id) else {
            return Ok(None);
        };
        let conn = self.get_conn().await?;
        let sql = format!("SELECT string FROM {} WHERE id = $1", table_name(use_case_id));

        let row = conn
            .query_opt(&sql, &[&id])
            .await
            .map_err(query_failed("reverse_lookup"))?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn purge_stale(
        &self,
        use_case_id: UseCaseKey,
        cutoff: DateTime<Utc>,
    ) -> IndexerResult<u64> {
        let conn = self.get_conn().await?;
        let sql = format!("DELETE FROM {} WHERE last_seen < $1", table_name(use_case_id));

        let purged = conn
            .execute(&sql, &[&cutoff])
            .await
            .map_err(query_failed("purge_stale"))?;

        tracing::debug!(use_case = %use_case_id, purged, "purged stale strings");
        Ok(purged)
    }

    async fn health_check(&self) -> IndexerResult<bool> {
        let conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "store health check failed");
                return Ok(false);
            }
        };
        Ok(conn.query_one("SELECT 1", &[]).await.is_ok())
    }

    async fn count(&self, use_case_id: UseCaseKey) -> IndexerResult<u64> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", table_name(use_case_id));
        let row = conn
            .query_one(&sql, &[])
            .await
            .map_err(query_failed("count"))?;
        Ok(from_db_id(row.get(0))?)
    }
}

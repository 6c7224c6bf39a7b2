use std::str::FromStr;
use std::time::Duration;

use polreg_contracts::{NewPolicy, PageRequest, PolicyRecord, ScanQuery};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};

pub mod query;

pub use sqlx::Error as SqlxError;

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Duplicate { number: String },
    NotFound { id: i64 },
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::Duplicate { number } => {
                write!(f, "policy number `{}` already exists", number)
            }
            StoreError::NotFound { id } => write!(f, "policy {} not found", id),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        StoreError::Sqlx(value.into())
    }
}

/// One page of a scan plus the number of rows matching the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    pub items: Vec<PolicyRecord>,
    pub total: i64,
}

#[derive(Clone)]
pub struct PolicyStore {
    pool: sqlx::SqlitePool,
    op_timeout: Duration,
}

impl PolicyStore {
    pub async fn connect(
        db_url: &str,
        max_connections: u32,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own empty
        // database, so the pool must hold exactly one connection forever.
        let pool_options = if is_in_memory_url(db_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            pool_options.connect_with(options),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(Self { pool, op_timeout })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        max_connections: u32,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let store = Self::connect(db_url, max_connections, op_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Fresh private database, migrated. Used by tests and tooling.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect_and_migrate("sqlite::memory:", 1, Duration::from_secs(2)).await
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        tracing::debug!("policy store schema is current");
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::timeout(self.op_timeout, sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    pub async fn insert(&self, policy: &NewPolicy) -> Result<PolicyRecord, StoreError> {
        let premium = normalize_premium(policy.premium);
        let inserted = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT INTO policies (number, holder, premium, status) VALUES (?, ?, ?, ?)",
            )
            .bind(&policy.number)
            .bind(&policy.holder)
            .bind(premium)
            .bind(&policy.status)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)?;

        let id = match inserted {
            Ok(done) => done.last_insert_rowid(),
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Duplicate {
                    number: policy.number.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        Ok(PolicyRecord {
            id,
            number: policy.number.clone(),
            holder: policy.holder.clone(),
            premium,
            status: policy.status.clone(),
        })
    }

    /// Inserts unless `number` already exists. Returns whether a row was
    /// written.
    pub async fn insert_or_ignore(&self, policy: &NewPolicy) -> Result<bool, StoreError> {
        let premium = normalize_premium(policy.premium);
        let done = tokio::time::timeout(
            self.op_timeout,
            sqlx::query(
                "INSERT OR IGNORE INTO policies (number, holder, premium, status) VALUES (?, ?, ?, ?)",
            )
            .bind(&policy.number)
            .bind(&policy.holder)
            .bind(premium)
            .bind(&policy.status)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(done.rows_affected() == 1)
    }

    pub async fn get(&self, id: i64) -> Result<PolicyRecord, StoreError> {
        let row = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("SELECT id, number, holder, premium, status FROM policies WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        match row {
            Some(row) => Ok(policy_from_row(&row)?),
            None => Err(StoreError::NotFound { id }),
        }
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let done = tokio::time::timeout(
            self.op_timeout,
            sqlx::query("DELETE FROM policies WHERE id = ?")
                .bind(id)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    /// Count and page are read inside one transaction so `total` describes
    /// the same snapshot as `items`.
    pub async fn scan(&self, query: &ScanQuery, page: PageRequest) -> Result<ScanPage, StoreError> {
        let (total, rows) = tokio::time::timeout(self.op_timeout, async {
            let mut tx = self.pool.begin().await?;

            let mut count = query::count_query(query);
            let total = count.build_query_scalar::<i64>().fetch_one(&mut *tx).await?;

            let mut select = query::page_query(query, page);
            let rows = select.build().fetch_all(&mut *tx).await?;

            tx.commit().await?;
            Ok::<_, sqlx::Error>((total, rows))
        })
        .await
        .map_err(|_| StoreError::Timeout)??;

        let items = rows
            .iter()
            .map(policy_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ScanPage { items, total })
    }

    /// Every matching record in scan order, without paging.
    pub async fn scan_all(&self, query: &ScanQuery) -> Result<Vec<PolicyRecord>, StoreError> {
        let mut select = query::select_query(query);
        let rows = tokio::time::timeout(self.op_timeout, select.build().fetch_all(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;

        Ok(rows
            .iter()
            .map(policy_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn policy_from_row(row: &SqliteRow) -> Result<PolicyRecord, sqlx::Error> {
    Ok(PolicyRecord {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        holder: row.try_get("holder")?,
        premium: row.try_get("premium")?,
        status: row.try_get("status")?,
    })
}

/// SQLite stores `-0.0` as `0.0`; fold it here so the echoed record matches
/// what a later read returns.
fn normalize_premium(premium: f64) -> f64 {
    premium + 0.0
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn is_in_memory_url(db_url: &str) -> bool {
    db_url.contains(":memory:") || db_url.contains("mode=memory")
}

pub async fn migrate(pool: &sqlx::SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

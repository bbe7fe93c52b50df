//! `OutboxPool`/`OutboxTx`: the multi-backend SQL handle the rest of this
//! crate is written against.
//!
//! One enum, one variant per compiled-in backend, feature-gated — there
//! is no `sqlx::Any` abstraction here because the per-backend SQL
//! (placeholder style, last-insert-id mechanics) genuinely differs; see
//! `store.rs`.

use crate::error::{OutboxError, Result};

/// A connection pool to the outbox's backing store. One variant per
/// compiled-in backend.
pub enum OutboxPool {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),
    #[cfg(feature = "mysql")]
    MySql(sqlx::MySqlPool),
}

impl Clone for OutboxPool {
    fn clone(&self) -> Self {
        match self {
            #[cfg(feature = "sqlite")]
            OutboxPool::Sqlite(p) => OutboxPool::Sqlite(p.clone()),
            #[cfg(feature = "postgres")]
            OutboxPool::Postgres(p) => OutboxPool::Postgres(p.clone()),
            #[cfg(feature = "mysql")]
            OutboxPool::MySql(p) => OutboxPool::MySql(p.clone()),
        }
    }
}

impl OutboxPool {
    /// Connect using a driver name and DSN, matching the `DataSource(driver,
    /// dsn)` configuration option.
    pub async fn connect(driver: &str, dsn: &str) -> Result<Self> {
        match driver {
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(OutboxPool::Sqlite(sqlx::SqlitePool::connect(dsn).await?)),
            #[cfg(feature = "postgres")]
            "postgres" | "postgresql" => Ok(OutboxPool::Postgres(sqlx::PgPool::connect(dsn).await?)),
            #[cfg(feature = "mysql")]
            "mysql" => Ok(OutboxPool::MySql(sqlx::MySqlPool::connect(dsn).await?)),
            other => Err(OutboxError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Create the `Messages` table if it does not already exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            OutboxPool::Sqlite(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS Messages (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        type TEXT NOT NULL,
                        payload BLOB NOT NULL,
                        dispatched TIMESTAMP NULL
                    )",
                )
                .execute(pool)
                .await?;
            }
            #[cfg(feature = "postgres")]
            OutboxPool::Postgres(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS Messages (
                        id BIGSERIAL PRIMARY KEY,
                        type TEXT NOT NULL,
                        payload BYTEA NOT NULL,
                        dispatched TIMESTAMP NULL
                    )",
                )
                .execute(pool)
                .await?;
            }
            #[cfg(feature = "mysql")]
            OutboxPool::MySql(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS Messages (
                        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
                        type TEXT NOT NULL,
                        payload LONGBLOB NOT NULL,
                        dispatched TIMESTAMP(6) NULL
                    )",
                )
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Begin a transaction, applying `isolation` first where the driver
    /// requires a separate statement for it.
    pub async fn begin(&self, isolation: IsolationLevel) -> Result<OutboxTx> {
        match self {
            #[cfg(feature = "sqlite")]
            OutboxPool::Sqlite(pool) => Ok(OutboxTx::Sqlite(pool.begin().await?)),
            #[cfg(feature = "postgres")]
            OutboxPool::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()))
                    .execute(&mut *tx)
                    .await?;
                Ok(OutboxTx::Postgres(tx))
            }
            #[cfg(feature = "mysql")]
            OutboxPool::MySql(pool) => {
                sqlx::query(&format!("SET SESSION TRANSACTION ISOLATION LEVEL {}", isolation.as_sql()))
                    .execute(pool)
                    .await?;
                Ok(OutboxTx::MySql(pool.begin().await?))
            }
        }
    }

    pub async fn close(&self) {
        match self {
            #[cfg(feature = "sqlite")]
            OutboxPool::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "postgres")]
            OutboxPool::Postgres(pool) => pool.close().await,
            #[cfg(feature = "mysql")]
            OutboxPool::MySql(pool) => pool.close().await,
        }
    }
}

/// An open transaction against the outbox's backing store, handed to
/// `MessageStore::store` and (before commit) exposed to the caller's own
/// SQL work via `crate::receiver::TxHandle`.
pub enum OutboxTx {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::Transaction<'static, sqlx::Sqlite>),
    #[cfg(feature = "postgres")]
    Postgres(sqlx::Transaction<'static, sqlx::Postgres>),
    #[cfg(feature = "mysql")]
    MySql(sqlx::Transaction<'static, sqlx::MySql>),
}

impl OutboxTx {
    pub async fn commit(self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            OutboxTx::Sqlite(tx) => tx.commit().await?,
            #[cfg(feature = "postgres")]
            OutboxTx::Postgres(tx) => tx.commit().await?,
            #[cfg(feature = "mysql")]
            OutboxTx::MySql(tx) => tx.commit().await?,
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            OutboxTx::Sqlite(tx) => tx.rollback().await?,
            #[cfg(feature = "postgres")]
            OutboxTx::Postgres(tx) => tx.rollback().await?,
            #[cfg(feature = "mysql")]
            OutboxTx::MySql(tx) => tx.rollback().await?,
        }
        Ok(())
    }
}

/// SQL transaction isolation level. Default is `ReadCommitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::ReadCommitted
    }
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_unknown_driver() {
        let result = OutboxPool::connect("oracle", "oracle://whatever").await;
        assert!(matches!(result, Err(OutboxError::UnsupportedDriver(ref d)) if d == "oracle"));
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let pool = OutboxPool::connect("sqlite", "sqlite::memory:").await.unwrap();
        pool.ensure_schema().await.unwrap();
        pool.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    async fn begin_and_rollback_round_trip() {
        let pool = OutboxPool::connect("sqlite", "sqlite::memory:").await.unwrap();
        pool.ensure_schema().await.unwrap();
        let tx = pool.begin(IsolationLevel::default()).await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[test]
    fn default_isolation_is_read_committed() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }
}

//! `MessageStore`: the `Messages` table operations — `store`, `load`,
//! `confirm`.

use async_trait::async_trait;
use mq_contracts::Dispatch;

use crate::error::{OutboxError, Result};
use crate::pool::{OutboxPool, OutboxTx};

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "mysql")]
mod mysql;

/// Persists `Dispatch` values into the `Messages` table and later loads
/// and confirms them. A user may supply a custom implementation via the
/// `MessageStore` configuration option; the default is [`SqlMessageStore`].
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert `dispatches` as one multi-row statement inside `tx`,
    /// back-filling each dispatch's `message_id` from the assigned
    /// identity. A no-op when `dispatches` is empty.
    async fn store(&self, tx: &mut OutboxTx, dispatches: &mut [Dispatch]) -> Result<()>;

    /// Rows with `dispatched IS NULL AND id > since_id`, ascending by id.
    async fn load(&self, since_id: u64) -> Result<Vec<Dispatch>>;

    /// Mark the given dispatches' rows `dispatched = now()`.
    async fn confirm(&self, dispatches: &[Dispatch]) -> Result<()>;
}

/// The default `MessageStore`: one multi-backend SQL implementation
/// dispatching on the concrete `OutboxPool`/`OutboxTx` variant.
pub struct SqlMessageStore {
    pool: OutboxPool,
}

impl SqlMessageStore {
    pub fn new(pool: OutboxPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for SqlMessageStore {
    async fn store(&self, tx: &mut OutboxTx, dispatches: &mut [Dispatch]) -> Result<()> {
        if dispatches.is_empty() {
            return Ok(());
        }

        match tx {
            #[cfg(feature = "sqlite")]
            OutboxTx::Sqlite(tx) => sqlite::store(tx, dispatches).await,
            #[cfg(feature = "postgres")]
            OutboxTx::Postgres(tx) => postgres::store(tx, dispatches).await,
            #[cfg(feature = "mysql")]
            OutboxTx::MySql(tx) => mysql::store(tx, dispatches).await,
        }
    }

    async fn load(&self, since_id: u64) -> Result<Vec<Dispatch>> {
        match &self.pool {
            #[cfg(feature = "sqlite")]
            OutboxPool::Sqlite(pool) => sqlite::load(pool, since_id).await,
            #[cfg(feature = "postgres")]
            OutboxPool::Postgres(pool) => postgres::load(pool, since_id).await,
            #[cfg(feature = "mysql")]
            OutboxPool::MySql(pool) => mysql::load(pool, since_id).await,
        }
    }

    async fn confirm(&self, dispatches: &[Dispatch]) -> Result<()> {
        if dispatches.is_empty() {
            return Ok(());
        }

        match &self.pool {
            #[cfg(feature = "sqlite")]
            OutboxPool::Sqlite(pool) => sqlite::confirm(pool, dispatches).await,
            #[cfg(feature = "postgres")]
            OutboxPool::Postgres(pool) => postgres::confirm(pool, dispatches).await,
            #[cfg(feature = "mysql")]
            OutboxPool::MySql(pool) => mysql::confirm(pool, dispatches).await,
        }
    }
}

/// Shared row->`Dispatch` assembly: `load` always routes by message type
/// (default routing) and stamps the current time.
fn row_to_dispatch(id: i64, message_type: String, payload: Vec<u8>) -> Dispatch {
    Dispatch {
        message_id: id as u64,
        message_type: message_type.clone(),
        topic: message_type,
        payload,
        timestamp: Some(chrono::Utc::now()),
        ..Default::default()
    }
}

/// `RowsAffected`/`LastInsertId` assertions shared by every backend's
/// `store`.
fn assert_store_result(rows_affected: u64, expected: usize, last_insert_id: i64) -> Result<()> {
    if rows_affected != expected as u64 {
        return Err(OutboxError::RowsAffected);
    }
    if last_insert_id <= 0 {
        return Err(OutboxError::IdentityFailure);
    }
    Ok(())
}

/// Back-fill each dispatch's `message_id` assuming the driver assigned a
/// contiguous block ending at `last_insert_id`.
fn backfill_message_ids(dispatches: &mut [Dispatch], last_insert_id: i64) {
    let length = dispatches.len() as u64;
    let last_insert_id = last_insert_id as u64;
    for (i, dispatch) in dispatches.iter_mut().enumerate() {
        dispatch.message_id = last_insert_id - (length - 1 - i as u64);
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::pool::IsolationLevel;

    async fn memory_pool() -> OutboxPool {
        let pool = OutboxPool::connect("sqlite", "sqlite::memory:").await.unwrap();
        pool.ensure_schema().await.unwrap();
        pool
    }

    fn dispatch(message_type: &str, payload: &[u8]) -> Dispatch {
        Dispatch { message_type: message_type.to_string(), payload: payload.to_vec(), ..Default::default() }
    }

    #[tokio::test]
    async fn store_backfills_ids_and_load_returns_unconfirmed_rows() {
        let pool = memory_pool().await;
        let store = SqlMessageStore::new(pool.clone());

        let mut tx = pool.begin(IsolationLevel::default()).await.unwrap();
        let mut dispatches = vec![dispatch("order.created", b"a"), dispatch("order.shipped", b"b")];
        store.store(&mut tx, &mut dispatches).await.unwrap();
        tx.commit().await.unwrap();

        assert!(dispatches[0].message_id > 0);
        assert_eq!(dispatches[1].message_id, dispatches[0].message_id + 1);

        let loaded = store.load(0).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].message_type, "order.created");
        assert_eq!(loaded[1].message_type, "order.shipped");
    }

    #[tokio::test]
    async fn confirm_excludes_rows_from_later_loads() {
        let pool = memory_pool().await;
        let store = SqlMessageStore::new(pool.clone());

        let mut tx = pool.begin(IsolationLevel::default()).await.unwrap();
        let mut dispatches = vec![dispatch("order.created", b"a")];
        store.store(&mut tx, &mut dispatches).await.unwrap();
        tx.commit().await.unwrap();

        store.confirm(&dispatches).await.unwrap();

        let loaded = store.load(0).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn store_is_a_noop_on_empty_slice() {
        let pool = memory_pool().await;
        let store = SqlMessageStore::new(pool.clone());
        let mut tx = pool.begin(IsolationLevel::default()).await.unwrap();
        let mut dispatches: Vec<Dispatch> = Vec::new();
        store.store(&mut tx, &mut dispatches).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[test]
    fn backfill_assigns_contiguous_ids_ending_at_last_insert_id() {
        let mut dispatches = vec![Dispatch::default(), Dispatch::default(), Dispatch::default()];
        backfill_message_ids(&mut dispatches, 10);
        assert_eq!(dispatches[0].message_id, 8);
        assert_eq!(dispatches[1].message_id, 9);
        assert_eq!(dispatches[2].message_id, 10);
    }

    #[test]
    fn assert_store_result_rejects_mismatched_rows_affected() {
        assert!(matches!(assert_store_result(1, 2, 5), Err(OutboxError::RowsAffected)));
    }

    #[test]
    fn assert_store_result_rejects_non_positive_identity() {
        assert!(matches!(assert_store_result(2, 2, 0), Err(OutboxError::IdentityFailure)));
    }
}

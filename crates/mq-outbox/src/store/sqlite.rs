//! SQLite backend for [`super::MessageStore`]. Uses `last_insert_rowid()`
//! via `sqlx`'s `LastInsertId` on `SqliteQueryResult`.

use chrono::Utc;
use mq_contracts::Dispatch;
use sqlx::{Row, Sqlite, SqlitePool};

use crate::error::Result;
use crate::store::{assert_store_result, backfill_message_ids, row_to_dispatch};

pub(super) async fn store(tx: &mut sqlx::Transaction<'static, Sqlite>, dispatches: &mut [Dispatch]) -> Result<()> {
    let mut builder = String::from("INSERT INTO Messages (type, payload) VALUES ");
    for i in 0..dispatches.len() {
        builder.push_str(if i == 0 { "(?,?)" } else { ",(?,?)" });
    }

    let mut query = sqlx::query(&builder);
    for dispatch in dispatches.iter() {
        query = query.bind(&dispatch.message_type).bind(&dispatch.payload);
    }

    let result = query.execute(&mut **tx).await?;
    assert_store_result(result.rows_affected(), dispatches.len(), result.last_insert_rowid())?;
    backfill_message_ids(dispatches, result.last_insert_rowid());
    Ok(())
}

pub(super) async fn load(pool: &SqlitePool, since_id: u64) -> Result<Vec<Dispatch>> {
    let rows = sqlx::query(
        "SELECT id, type, payload FROM Messages WHERE dispatched IS NULL AND id > ? ORDER BY id",
    )
    .bind(since_id as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| row_to_dispatch(row.get("id"), row.get("type"), row.get("payload")))
        .collect())
}

pub(super) async fn confirm(pool: &SqlitePool, dispatches: &[Dispatch]) -> Result<()> {
    let placeholders = vec!["?"; dispatches.len()].join(",");
    let statement = format!(
        "UPDATE Messages SET dispatched = ? WHERE dispatched IS NULL AND id IN ({placeholders})"
    );

    let mut query = sqlx::query(&statement).bind(Utc::now());
    for dispatch in dispatches {
        query = query.bind(dispatch.message_id as i64);
    }
    query.execute(pool).await?;
    Ok(())
}

//! MySQL backend for [`super::MessageStore`]. Uses `LAST_INSERT_ID()`
//! semantics via `sqlx`'s `MySqlQueryResult::last_insert_id()`, which
//! reports the id of the *first* row in a multi-row insert — the same
//! contiguous-block assumption the other backends rely on, anchored at
//! the opposite end from SQLite/Postgres's last-row id.

use chrono::Utc;
use mq_contracts::Dispatch;
use sqlx::{MySql, MySqlPool, Row};

use crate::error::{OutboxError, Result};
use crate::store::row_to_dispatch;

pub(super) async fn store(tx: &mut sqlx::Transaction<'static, MySql>, dispatches: &mut [Dispatch]) -> Result<()> {
    let mut builder = String::from("INSERT INTO Messages (type, payload) VALUES ");
    for i in 0..dispatches.len() {
        builder.push_str(if i == 0 { "(?,?)" } else { ",(?,?)" });
    }

    let mut query = sqlx::query(&builder);
    for dispatch in dispatches.iter() {
        query = query.bind(&dispatch.message_type).bind(&dispatch.payload);
    }

    let result = query.execute(&mut **tx).await?;
    if result.rows_affected() != dispatches.len() as u64 {
        return Err(OutboxError::RowsAffected);
    }
    let first_id = result.last_insert_id();
    if first_id == 0 {
        return Err(OutboxError::IdentityFailure);
    }

    for (i, dispatch) in dispatches.iter_mut().enumerate() {
        dispatch.message_id = first_id + i as u64;
    }
    Ok(())
}

pub(super) async fn load(pool: &MySqlPool, since_id: u64) -> Result<Vec<Dispatch>> {
    let rows = sqlx::query(
        "SELECT id, type, payload FROM Messages WHERE dispatched IS NULL AND id > ? ORDER BY id",
    )
    .bind(since_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| row_to_dispatch(row.get::<i64, _>("id"), row.get("type"), row.get("payload")))
        .collect())
}

pub(super) async fn confirm(pool: &MySqlPool, dispatches: &[Dispatch]) -> Result<()> {
    let placeholders = vec!["?"; dispatches.len()].join(",");
    let statement = format!(
        "UPDATE Messages SET dispatched = ? WHERE dispatched IS NULL AND id IN ({placeholders})"
    );

    let mut query = sqlx::query(&statement).bind(Utc::now());
    for dispatch in dispatches {
        query = query.bind(dispatch.message_id);
    }
    query.execute(pool).await?;
    Ok(())
}

//! Postgres backend for [`super::MessageStore`]. Postgres has no
//! driver-level last-insert-id, so `store` asks for it explicitly via
//! `RETURNING id` on the last inserted row.

use chrono::Utc;
use mq_contracts::Dispatch;
use sqlx::{PgPool, Postgres, Row};

use crate::error::Result;
use crate::store::{assert_store_result, backfill_message_ids, row_to_dispatch};

pub(super) async fn store(tx: &mut sqlx::Transaction<'static, Postgres>, dispatches: &mut [Dispatch]) -> Result<()> {
    let mut builder = String::from("INSERT INTO Messages (type, payload) VALUES ");
    for i in 0..dispatches.len() {
        if i > 0 {
            builder.push(',');
        }
        builder.push_str(&format!("(${},${})", i * 2 + 1, i * 2 + 2));
    }
    builder.push_str(" RETURNING id");

    let mut query = sqlx::query(&builder);
    for dispatch in dispatches.iter() {
        query = query.bind(&dispatch.message_type).bind(&dispatch.payload);
    }

    let rows = query.fetch_all(&mut **tx).await?;
    let last_insert_id = rows.last().map(|r| r.get::<i64, _>("id")).unwrap_or(0);
    assert_store_result(rows.len() as u64, dispatches.len(), last_insert_id)?;
    backfill_message_ids(dispatches, last_insert_id);
    Ok(())
}

pub(super) async fn load(pool: &PgPool, since_id: u64) -> Result<Vec<Dispatch>> {
    let rows = sqlx::query(
        "SELECT id, type, payload FROM Messages WHERE dispatched IS NULL AND id > $1 ORDER BY id",
    )
    .bind(since_id as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| row_to_dispatch(row.get("id"), row.get("type"), row.get("payload")))
        .collect())
}

pub(super) async fn confirm(pool: &PgPool, dispatches: &[Dispatch]) -> Result<()> {
    let ids: Vec<i64> = dispatches.iter().map(|d| d.message_id as i64).collect();
    sqlx::query("UPDATE Messages SET dispatched = $1 WHERE dispatched IS NULL AND id = ANY($2)")
        .bind(Utc::now())
        .bind(&ids)
        .execute(pool)
        .await?;
    Ok(())
}

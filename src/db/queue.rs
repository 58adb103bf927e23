use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::queue::{NewQueueItem, QueueItem, QueueStatus};

use super::{from_millis, to_millis, QueueStore, SqliteStore};

impl ToSql for QueueStatus {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(ToSqlOutput::from(self.as_str()))
  }
}

impl FromSql for QueueStatus {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    let text = value.as_str()?;
    QueueStatus::parse(text).ok_or_else(|| FromSqlError::Other(format!("unknown queue status {text}").into()))
  }
}

const COLUMNS: &str =
  "id, order_id, status, priority, created_at, retry_count, last_error, processed_at";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
  let retry_count: i64 = row.get(5)?;
  Ok(QueueItem {
    id: row.get(0)?,
    order_id: row.get(1)?,
    status: row.get(2)?,
    priority: row.get(3)?,
    created_at: from_millis(4, row.get(4)?)?,
    retry_count: u32::try_from(retry_count)
      .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, retry_count))?,
    last_error: row.get(6)?,
    processed_at: row
      .get::<_, Option<i64>>(7)?
      .map(|ms| from_millis(7, ms))
      .transpose()?,
  })
}

impl QueueStore for SqliteStore {
  fn insert_items(&self, items: &[NewQueueItem]) -> Result<Vec<String>> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut ids = Vec::with_capacity(items.len());
    {
      let mut stmt = tx
        .prepare(
          "INSERT INTO refresh_queue (id, order_id, status, priority, created_at, retry_count)
           VALUES (?, ?, ?, ?, ?, 0)",
        )
        .map_err(|e| eyre!("Failed to prepare queue insert: {}", e))?;

      for item in items {
        let id = Uuid::new_v4().to_string();
        stmt
          .execute(params![
            id,
            item.order_id,
            QueueStatus::Pending,
            item.priority,
            to_millis(item.created_at)
          ])
          .map_err(|e| eyre!("Failed to enqueue order {}: {}", item.order_id, e))?;
        ids.push(id);
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(ids)
  }

  fn get_item(&self, id: &str) -> Result<Option<QueueItem>> {
    let conn = self.lock()?;
    conn
      .query_row(
        &format!("SELECT {COLUMNS} FROM refresh_queue WHERE id = ?"),
        params![id],
        item_from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to load queue item {}: {}", id, e))
  }

  fn pending_items(&self, limit: usize) -> Result<Vec<QueueItem>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {COLUMNS} FROM refresh_queue WHERE status = ?
         ORDER BY priority DESC, created_at ASC, rowid LIMIT ?"
      ))
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let items = stmt
      .query_map(params![QueueStatus::Pending, limit], item_from_row)
      .map_err(|e| eyre!("Failed to query pending items: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending items: {}", e))?;

    Ok(items)
  }

  fn mark_processing(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
    let conn = self.lock()?;
    let changed = conn
      .execute(
        "UPDATE refresh_queue SET status = ?, processed_at = ? WHERE id = ?",
        params![QueueStatus::Processing, to_millis(at), id],
      )
      .map_err(|e| eyre!("Failed to mark queue item {}: {}", id, e))?;

    if changed == 0 {
      return Err(eyre!("Queue item {} not found", id));
    }
    Ok(())
  }

  fn reschedule(&self, id: &str, retry_count: u32, error: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE refresh_queue SET status = ?, retry_count = ?, last_error = ? WHERE id = ?",
        params![QueueStatus::Pending, retry_count, error, id],
      )
      .map_err(|e| eyre!("Failed to reschedule queue item {}: {}", id, e))?;
    Ok(())
  }

  fn delete_item(&self, id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM refresh_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete queue item {}: {}", id, e))?;
    Ok(())
  }

  fn delete_older_than(
    &self,
    cutoff: DateTime<Utc>,
    limit: Option<usize>,
  ) -> Result<Vec<QueueItem>> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // LIMIT -1 is unbounded in SQLite
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let items = {
      let mut stmt = tx
        .prepare(&format!(
          "SELECT {COLUMNS} FROM refresh_queue WHERE created_at < ?
           ORDER BY created_at ASC, rowid LIMIT ?"
        ))
        .map_err(|e| eyre!("Failed to prepare purge query: {}", e))?;
      let items = stmt
        .query_map(params![to_millis(cutoff), limit], item_from_row)
        .map_err(|e| eyre!("Failed to query old queue items: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read old queue items: {}", e))?;
      items
    };

    for item in &items {
      tx.execute("DELETE FROM refresh_queue WHERE id = ?", params![item.id])
        .map_err(|e| eyre!("Failed to purge queue item {}: {}", item.id, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(items)
  }

  fn count_pending(&self) -> Result<u64> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM refresh_queue WHERE status = ?",
        params![QueueStatus::Pending],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count pending items: {}", e))?;
    Ok(u64::try_from(count).unwrap_or_default())
  }
}

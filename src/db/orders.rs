use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::warn;

use crate::orders::types::{OrderPatch, StoredOrder};

use super::{OrderQuery, OrderStore, SqliteStore, WriteOutcome};

fn load_document(conn: &Connection, id: &str) -> Result<Option<Map<String, Value>>> {
  let data: Option<String> = conn
    .query_row("SELECT data FROM orders WHERE id = ?", params![id], |row| {
      row.get(0)
    })
    .optional()
    .map_err(|e| eyre!("Failed to load order {}: {}", id, e))?;

  match data {
    Some(data) => match serde_json::from_str(&data) {
      Ok(Value::Object(fields)) => Ok(Some(fields)),
      Ok(_) => Err(eyre!("Order {} is not a JSON object", id)),
      Err(e) => Err(eyre!("Failed to parse order {}: {}", id, e)),
    },
    None => Ok(None),
  }
}

fn load_order(conn: &Connection, id: &str) -> Result<Option<StoredOrder>> {
  load_document(conn, id)?
    .map(|fields| {
      serde_json::from_value(Value::Object(fields))
        .map_err(|e| eyre!("Failed to decode order {}: {}", id, e))
    })
    .transpose()
}

/// Field-level merge of `patch` into the stored document, creating it when
/// `create` is set. Runs in one transaction.
fn write_fields(
  conn: &mut Connection,
  id: &str,
  patch: &OrderPatch,
  create: bool,
) -> Result<WriteOutcome> {
  let fields = patch.to_fields()?;
  let tx = conn
    .transaction()
    .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

  let (mut document, outcome) = match load_document(&tx, id)? {
    Some(existing) => (existing, WriteOutcome::Updated),
    None if create => (Map::new(), WriteOutcome::Created),
    None => return Err(eyre!("Order {} not found", id)),
  };

  document.insert("id".to_string(), Value::String(id.to_string()));
  document.extend(fields);

  let sku = document
    .get("sku")
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();
  let synced_at = document
    .get("synced_at")
    .and_then(Value::as_i64)
    .unwrap_or_default();
  let data = serde_json::to_string(&document)
    .map_err(|e| eyre!("Failed to serialize order {}: {}", id, e))?;

  tx.execute(
    "INSERT OR REPLACE INTO orders (id, sku, synced_at, data) VALUES (?, ?, ?, ?)",
    params![id, sku, synced_at, data],
  )
  .map_err(|e| eyre!("Failed to store order {}: {}", id, e))?;

  tx.commit()
    .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

  Ok(outcome)
}

impl OrderStore for SqliteStore {
  fn get_order(&self, id: &str) -> Result<Option<StoredOrder>> {
    let conn = self.lock()?;
    load_order(&conn, id)
  }

  fn upsert_order(&self, id: &str, patch: &OrderPatch) -> Result<WriteOutcome> {
    let mut conn = self.lock()?;
    write_fields(&mut conn, id, patch, true)
  }

  fn upsert_order_with(
    &self,
    id: &str,
    build: &mut dyn FnMut(Option<&StoredOrder>) -> Option<OrderPatch>,
  ) -> Result<Option<WriteOutcome>> {
    // The connection lock is held from the read through the write
    let mut conn = self.lock()?;
    let existing = load_order(&conn, id)?;
    match build(existing.as_ref()) {
      Some(patch) => write_fields(&mut conn, id, &patch, true).map(Some),
      None => Ok(None),
    }
  }

  fn update_order(&self, id: &str, patch: &OrderPatch) -> Result<()> {
    let mut conn = self.lock()?;
    write_fields(&mut conn, id, patch, false).map(|_| ())
  }

  fn list_orders(&self, query: &OrderQuery) -> Result<Vec<StoredOrder>> {
    let conn = self.lock()?;
    let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
    let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

    let rows: Vec<(String, String)> = match &query.sku {
      Some(sku) => {
        let mut stmt = conn
          .prepare(
            "SELECT id, data FROM orders WHERE sku = ?
             ORDER BY synced_at DESC, id LIMIT ? OFFSET ?",
          )
          .map_err(|e| eyre!("Failed to prepare order query: {}", e))?;
        let rows = stmt
          .query_map(params![sku, limit, offset], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })
          .map_err(|e| eyre!("Failed to query orders: {}", e))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| eyre!("Failed to read orders: {}", e))?;
        rows
      }
      None => {
        let mut stmt = conn
          .prepare("SELECT id, data FROM orders ORDER BY synced_at DESC, id LIMIT ? OFFSET ?")
          .map_err(|e| eyre!("Failed to prepare order query: {}", e))?;
        let rows = stmt
          .query_map(params![limit, offset], |row| Ok((row.get(0)?, row.get(1)?)))
          .map_err(|e| eyre!("Failed to query orders: {}", e))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| eyre!("Failed to read orders: {}", e))?;
        rows
      }
    };

    Ok(
      rows
        .into_iter()
        .filter_map(|(id, data)| match serde_json::from_str::<StoredOrder>(&data) {
          Ok(order) => Some(order),
          Err(e) => {
            warn!(order_id = %id, "Skipping undecodable order document: {}", e);
            None
          }
        })
        .collect(),
    )
  }

  fn count_orders(&self, sku: Option<&str>) -> Result<u64> {
    let conn = self.lock()?;
    let count: i64 = match sku {
      Some(sku) => conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE sku = ?",
        params![sku],
        |row| row.get(0),
      ),
      None => conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0)),
    }
    .map_err(|e| eyre!("Failed to count orders: {}", e))?;

    Ok(u64::try_from(count).unwrap_or_default())
  }
}

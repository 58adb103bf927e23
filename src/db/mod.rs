//! Document store for the order cache and the refresh queue.
//!
//! The rest of the crate only sees the [`OrderStore`] and [`QueueStore`]
//! contracts: per-document reads and field-level writes, filtered/paginated
//! scans, counts, and all-or-nothing batch writes. [`SqliteStore`] implements
//! both on a single SQLite connection.

mod orders;
mod queue;
pub mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::orders::types::{OrderPatch, StoredOrder};
use crate::queue::{NewQueueItem, QueueItem};

/// Whether an upsert created the document or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
  Created,
  Updated,
}

/// Page request over the orders collection, newest sync first.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
  pub sku: Option<String>,
  pub offset: u64,
  pub limit: u64,
}

/// The orders collection.
pub trait OrderStore: Send + Sync {
  fn get_order(&self, id: &str) -> Result<Option<StoredOrder>>;

  /// Create the document or merge the patch's fields into it.
  fn upsert_order(&self, id: &str, patch: &OrderPatch) -> Result<WriteOutcome>;

  /// Read the current document and write whatever patch `build` derives from
  /// it, with no other write in between. `None` from `build` writes nothing
  /// and yields `None`.
  fn upsert_order_with(
    &self,
    id: &str,
    build: &mut dyn FnMut(Option<&StoredOrder>) -> Option<OrderPatch>,
  ) -> Result<Option<WriteOutcome>>;

  /// Merge the patch's fields into an existing document; fails if absent.
  fn update_order(&self, id: &str, patch: &OrderPatch) -> Result<()>;

  /// Ordered by `synced_at` descending, optionally filtered by exact SKU.
  fn list_orders(&self, query: &OrderQuery) -> Result<Vec<StoredOrder>>;

  fn count_orders(&self, sku: Option<&str>) -> Result<u64>;
}

/// The refresh queue collection.
pub trait QueueStore: Send + Sync {
  /// Insert all items in one batch; returns their generated ids.
  fn insert_items(&self, items: &[NewQueueItem]) -> Result<Vec<String>>;

  fn get_item(&self, id: &str) -> Result<Option<QueueItem>>;

  /// Pending items, highest priority first, oldest first within a priority.
  fn pending_items(&self, limit: usize) -> Result<Vec<QueueItem>>;

  /// Fails if the item no longer exists.
  fn mark_processing(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

  /// Put an item back to pending with a new retry count and error.
  fn reschedule(&self, id: &str, retry_count: u32, error: &str) -> Result<()>;

  /// Deleting a missing item is not an error.
  fn delete_item(&self, id: &str) -> Result<()>;

  /// Delete items created before `cutoff`, whatever their status, oldest
  /// first, at most `limit` of them. Returns what was deleted.
  fn delete_older_than(&self, cutoff: DateTime<Utc>, limit: Option<usize>)
    -> Result<Vec<QueueItem>>;

  fn count_pending(&self) -> Result<u64>;
}

/// SQLite-backed store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private in-memory database, gone when dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
  at.timestamp_millis()
}

fn from_millis(column: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(column, ms))
}

//! Refresh queue: "this order's cache is stale, refetch it" tasks.
//!
//! Items are created pending, flipped to processing by the worker, and
//! deleted on success, on reaching the retry ceiling, or by the age purge.
//! Several live items for the same order are tolerated; processing is
//! idempotent per order.

pub mod processor;
pub mod worker;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::db::QueueStore;

pub use processor::{ProcessReport, QueueProcessor};
pub use worker::RefreshWorker;

/// Priority used by the read path.
pub const DEFAULT_PRIORITY: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  Pending,
  Processing,
}

impl QueueStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      QueueStatus::Pending => "pending",
      QueueStatus::Processing => "processing",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "pending" => Some(QueueStatus::Pending),
      "processing" => Some(QueueStatus::Processing),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
  pub id: String,
  pub order_id: String,
  pub status: QueueStatus,
  /// Higher is more urgent
  pub priority: i64,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
  pub last_error: Option<String>,
  pub processed_at: Option<DateTime<Utc>>,
}

/// An item to insert; the store assigns the id and starts it pending with
/// no retries.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
  pub order_id: String,
  pub priority: i64,
  pub created_at: DateTime<Utc>,
}

/// What happened to an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
  /// Back to pending with this retry count
  Rescheduled(u32),
  /// Ceiling reached, deleted
  Dropped,
}

/// Queue operations with the enqueue cap and retry ceiling applied.
pub struct RefreshQueue<S> {
  store: Arc<S>,
  max_enqueue: usize,
  max_retries: u32,
}

impl<S: QueueStore> RefreshQueue<S> {
  pub fn new(store: Arc<S>, config: &QueueConfig) -> Self {
    Self {
      store,
      max_enqueue: config.max_enqueue,
      max_retries: config.max_retries,
    }
  }

  #[cfg(test)]
  pub fn store(&self) -> &S {
    &self.store
  }

  /// Create one pending item per order id, at most `max_enqueue` of them.
  /// Returns the ids of the created items.
  pub fn enqueue(&self, order_ids: &[String], priority: i64, now: DateTime<Utc>) -> Result<Vec<String>> {
    if order_ids.len() > self.max_enqueue {
      debug!(
        requested = order_ids.len(),
        cap = self.max_enqueue,
        "Capping refresh enqueue"
      );
    }

    let items: Vec<NewQueueItem> = order_ids
      .iter()
      .take(self.max_enqueue)
      .map(|order_id| NewQueueItem {
        order_id: order_id.clone(),
        priority,
        created_at: now,
      })
      .collect();

    if items.is_empty() {
      return Ok(Vec::new());
    }

    let ids = self.store.insert_items(&items)?;
    info!(count = ids.len(), "Enqueued order refreshes");
    Ok(ids)
  }

  /// Up to `max_items` pending items, priority desc then oldest first.
  pub fn dequeue_batch(&self, max_items: usize) -> Result<Vec<QueueItem>> {
    self.store.pending_items(max_items)
  }

  pub fn mark_processing(&self, item: &QueueItem, now: DateTime<Utc>) -> Result<()> {
    self.store.mark_processing(&item.id, now)
  }

  /// Success: the item is deleted.
  pub fn complete(&self, item: &QueueItem) -> Result<()> {
    self.store.delete_item(&item.id)
  }

  /// Failure: bump the retry count and reschedule, or drop the item once the
  /// ceiling is reached.
  pub fn retry(&self, item: &QueueItem, error: &str) -> Result<RetryOutcome> {
    let retry_count = item.retry_count.saturating_add(1);
    if retry_count >= self.max_retries {
      self.drop_after_max_retries(item)?;
      return Ok(RetryOutcome::Dropped);
    }

    self.store.reschedule(&item.id, retry_count, error)?;
    Ok(RetryOutcome::Rescheduled(retry_count))
  }

  pub fn drop_after_max_retries(&self, item: &QueueItem) -> Result<()> {
    self.store.delete_item(&item.id)
  }

  /// Delete every item older than `max_age`, whatever its status.
  pub fn purge_older_than(
    &self,
    max_age: chrono::Duration,
    limit: Option<usize>,
    now: DateTime<Utc>,
  ) -> Result<Vec<QueueItem>> {
    let purged = self.store.delete_older_than(now - max_age, limit)?;
    if !purged.is_empty() {
      info!(count = purged.len(), "Purged old refresh queue items");
    }
    Ok(purged)
  }

  pub fn count_pending(&self) -> Result<u64> {
    self.store.count_pending()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::SqliteStore;
  use chrono::{Duration, TimeZone};

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
  }

  fn queue() -> RefreshQueue<SqliteStore> {
    RefreshQueue::new(
      Arc::new(SqliteStore::open_in_memory().unwrap()),
      &QueueConfig::default(),
    )
  }

  fn ids(range: std::ops::Range<u32>) -> Vec<String> {
    range.map(|i| i.to_string()).collect()
  }

  #[test]
  fn enqueue_is_capped() {
    let queue = queue();
    let created = queue.enqueue(&ids(0..25), DEFAULT_PRIORITY, now()).unwrap();

    assert_eq!(created.len(), 10);
    assert_eq!(queue.count_pending().unwrap(), 10);

    let item = queue.store().get_item(&created[0]).unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 0);
    assert_eq!(item.priority, 1);
    assert_eq!(item.order_id, "0");
  }

  #[test]
  fn duplicates_are_not_deduplicated() {
    let queue = queue();
    queue.enqueue(&ids(0..1), DEFAULT_PRIORITY, now()).unwrap();
    queue.enqueue(&ids(0..1), DEFAULT_PRIORITY, now()).unwrap();
    assert_eq!(queue.count_pending().unwrap(), 2);
  }

  #[test]
  fn dequeue_orders_by_priority_then_age() {
    let queue = queue();
    queue
      .enqueue(&["old-low".to_string()], 1, now() - Duration::minutes(5))
      .unwrap();
    queue.enqueue(&["new-low".to_string()], 1, now()).unwrap();
    queue
      .enqueue(&["new-high".to_string()], 5, now())
      .unwrap();

    let batch = queue.dequeue_batch(2).unwrap();
    let order_ids: Vec<_> = batch.iter().map(|i| i.order_id.as_str()).collect();
    assert_eq!(order_ids, vec!["new-high", "old-low"]);
  }

  #[test]
  fn processing_items_are_not_dequeued() {
    let queue = queue();
    queue.enqueue(&ids(0..2), DEFAULT_PRIORITY, now()).unwrap();
    let batch = queue.dequeue_batch(1).unwrap();
    queue.mark_processing(&batch[0], now()).unwrap();

    let item = queue.store().get_item(&batch[0].id).unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Processing);
    assert_eq!(item.processed_at, Some(now()));

    let next = queue.dequeue_batch(5).unwrap();
    assert_eq!(next.len(), 1);
    assert_ne!(next[0].id, batch[0].id);
  }

  #[test]
  fn retry_reschedules_until_ceiling() {
    let queue = queue();
    queue.enqueue(&ids(0..1), DEFAULT_PRIORITY, now()).unwrap();

    let item = queue.dequeue_batch(1).unwrap().remove(0);
    queue.mark_processing(&item, now()).unwrap();
    assert_eq!(
      queue.retry(&item, "HTTP 500").unwrap(),
      RetryOutcome::Rescheduled(1)
    );

    let item = queue.dequeue_batch(1).unwrap().remove(0);
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.last_error.as_deref(), Some("HTTP 500"));
    assert_eq!(
      queue.retry(&item, "HTTP 500").unwrap(),
      RetryOutcome::Rescheduled(2)
    );

    let item = queue.dequeue_batch(1).unwrap().remove(0);
    assert_eq!(queue.retry(&item, "HTTP 500").unwrap(), RetryOutcome::Dropped);
    assert!(queue.store().get_item(&item.id).unwrap().is_none());
  }

  #[test]
  fn complete_deletes_and_is_idempotent() {
    let queue = queue();
    queue.enqueue(&ids(0..1), DEFAULT_PRIORITY, now()).unwrap();
    let item = queue.dequeue_batch(1).unwrap().remove(0);

    queue.complete(&item).unwrap();
    queue.complete(&item).unwrap();
    assert_eq!(queue.count_pending().unwrap(), 0);
  }

  #[test]
  fn purge_removes_old_items_regardless_of_status() {
    let queue = queue();
    let old = now() - Duration::hours(2);
    queue.enqueue(&ids(0..3), DEFAULT_PRIORITY, old).unwrap();
    queue.enqueue(&ids(10..12), DEFAULT_PRIORITY, now()).unwrap();

    let stuck = queue.dequeue_batch(1).unwrap().remove(0);
    queue.mark_processing(&stuck, old).unwrap();

    let purged = queue.purge_older_than(Duration::hours(1), None, now()).unwrap();
    assert_eq!(purged.len(), 3);
    assert!(purged.iter().any(|i| i.status == QueueStatus::Processing));
    assert_eq!(queue.count_pending().unwrap(), 2);
  }

  #[test]
  fn purge_respects_limit() {
    let queue = queue();
    queue
      .enqueue(&ids(0..5), DEFAULT_PRIORITY, now() - Duration::hours(3))
      .unwrap();

    let purged = queue
      .purge_older_than(Duration::hours(1), Some(2), now())
      .unwrap();
    assert_eq!(purged.len(), 2);
    assert_eq!(queue.count_pending().unwrap(), 3);
  }
}

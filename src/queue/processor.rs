//! Time-bounded batch worker for the refresh queue.

use chrono::Utc;
use color_eyre::{eyre::WrapErr, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::extract;
use crate::config::QueueConfig;
use crate::db::{OrderStore, QueueStore};
use crate::marketplace::{AccessTokenSource, Marketplace};

use super::{QueueItem, RefreshQueue, RetryOutcome};

/// Outcome of one processor invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
  pub success: bool,
  pub processed: u32,
  pub failed: u32,
  pub remaining: u64,
  pub cleaned_up: usize,
  pub execution_time_ms: u64,
}

pub struct QueueProcessor<S> {
  queue: RefreshQueue<S>,
  store: Arc<S>,
  marketplace: Arc<dyn Marketplace>,
  tokens: Arc<dyn AccessTokenSource>,
  batch_size: usize,
  time_budget: Duration,
  max_age: chrono::Duration,
  purge_batch: usize,
}

impl<S: OrderStore + QueueStore> QueueProcessor<S> {
  pub fn new(
    store: Arc<S>,
    marketplace: Arc<dyn Marketplace>,
    tokens: Arc<dyn AccessTokenSource>,
    config: &QueueConfig,
  ) -> Self {
    Self {
      queue: RefreshQueue::new(store.clone(), config),
      store,
      marketplace,
      tokens,
      batch_size: config.batch_size,
      time_budget: config.time_budget(),
      max_age: config.max_age(),
      purge_batch: config.purge_batch,
    }
  }

  pub fn queue(&self) -> &RefreshQueue<S> {
    &self.queue
  }

  /// Run one batch: purge old items, then refresh up to `batch_size` pending
  /// orders while the time budget lasts.
  ///
  /// Items left unprocessed when the budget runs out stay where they are and
  /// are reclaimed by a later purge. Fails only when no token can be had.
  pub async fn run_once(&self) -> Result<ProcessReport> {
    let started = Instant::now();
    let mut report = ProcessReport::default();

    match self
      .queue
      .purge_older_than(self.max_age, Some(self.purge_batch), Utc::now())
    {
      Ok(purged) => report.cleaned_up = purged.len(),
      Err(e) => warn!("Failed to purge refresh queue: {}", e),
    }

    let batch = self.queue.dequeue_batch(self.batch_size)?;
    if batch.is_empty() {
      debug!("Refresh queue is empty");
      return Ok(self.finish(report, started));
    }

    let token = self
      .tokens
      .valid_token()
      .await
      .wrap_err("Failed to obtain access token")?;

    info!(count = batch.len(), "Processing refresh queue batch");

    for item in &batch {
      if started.elapsed() >= self.time_budget {
        warn!(
          elapsed_ms = started.elapsed().as_millis() as u64,
          "Time budget exhausted, leaving the rest for the next run"
        );
        break;
      }

      match self.refresh_item(item, &token).await {
        Ok(()) => {
          report.processed += 1;
          debug!(order_id = %item.order_id, "Refreshed cached order");
        }
        Err(e) => {
          let message = e.to_string();
          warn!(order_id = %item.order_id, retry_count = item.retry_count, "Refresh failed: {}", message);
          match self.queue.retry(item, &message) {
            Ok(RetryOutcome::Dropped) => {
              report.failed += 1;
              error!(order_id = %item.order_id, "Dropping refresh after max retries");
            }
            Ok(RetryOutcome::Rescheduled(n)) => {
              debug!(order_id = %item.order_id, retry_count = n, "Refresh rescheduled");
            }
            Err(e) => error!(order_id = %item.order_id, "Failed to record refresh failure: {}", e),
          }
        }
      }
    }

    Ok(self.finish(report, started))
  }

  async fn refresh_item(&self, item: &QueueItem, token: &str) -> Result<()> {
    self.queue.mark_processing(item, Utc::now())?;

    let order = match self.marketplace.get_order(token, &item.order_id).await {
      Ok(order) => order,
      Err(e) => {
        if e.is_credential_problem() {
          self.tokens.invalidate().await;
        }
        return Err(e.into());
      }
    };

    self
      .store
      .update_order(&item.order_id, &extract::refresh(&order, Utc::now()))?;
    self.queue.complete(item)
  }

  fn finish(&self, mut report: ProcessReport, started: Instant) -> ProcessReport {
    report.remaining = self.queue.count_pending().unwrap_or_else(|e| {
      warn!("Failed to count pending refreshes: {}", e);
      0
    });
    report.success = true;
    report.execution_time_ms = started.elapsed().as_millis() as u64;
    report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::SqliteStore;
  use crate::orders::types::{Fulfillment, FulfillmentStatus, OrderPatch};
  use crate::queue::{QueueStatus, DEFAULT_PRIORITY};
  use crate::testing::{raw_order, FakeMarketplace, Reply, StaticTokens};
  use chrono::{DateTime, Duration as ChronoDuration, TimeZone};

  struct Harness {
    store: Arc<SqliteStore>,
    marketplace: Arc<FakeMarketplace>,
    tokens: Arc<StaticTokens>,
    processor: QueueProcessor<SqliteStore>,
  }

  fn harness(config: QueueConfig) -> Harness {
    harness_with_tokens(config, StaticTokens::valid())
  }

  fn harness_with_tokens(config: QueueConfig, tokens: StaticTokens) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let marketplace = Arc::new(FakeMarketplace::new());
    let tokens = Arc::new(tokens);
    let processor = QueueProcessor::new(store.clone(), marketplace.clone(), tokens.clone(), &config);
    Harness {
      store,
      marketplace,
      tokens,
      processor,
    }
  }

  /// Whole milliseconds, the precision the store keeps.
  fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    let at = Utc::now() - ChronoDuration::minutes(minutes);
    Utc.timestamp_millis_opt(at.timestamp_millis()).unwrap()
  }

  fn seed_order(store: &SqliteStore, id: &str, cached_at: DateTime<Utc>) {
    let patch = OrderPatch {
      sku: Some("VASO-01".into()),
      ml_cached_at: Some(cached_at),
      synced_at: Some(cached_at),
      created_at: Some(cached_at),
      fulfillment: Fulfillment {
        internal_status: Some(FulfillmentStatus::Printing),
        internal_notes: Some("white PLA".into()),
        ..Fulfillment::default()
      },
      ..OrderPatch::default()
    };
    store.upsert_order(id, &patch).unwrap();
  }

  fn enqueue(h: &Harness, order_id: &str) -> String {
    h.processor
      .queue()
      .enqueue(&[order_id.to_string()], DEFAULT_PRIORITY, Utc::now())
      .unwrap()
      .remove(0)
  }

  #[tokio::test]
  async fn empty_queue_needs_no_token() {
    let h = harness(QueueConfig::default());
    let report = h.processor.run_once().await.unwrap();

    assert!(report.success);
    assert_eq!(report.processed, 0);
    assert_eq!(report.remaining, 0);
    assert_eq!(h.tokens.issued(), 0);
  }

  #[tokio::test]
  async fn success_updates_cache_only_and_deletes_item() {
    let h = harness(QueueConfig::default());
    let stale = minutes_ago(30);
    seed_order(&h.store, "2001", stale);
    h.marketplace
      .script("2001", vec![Reply::Order(raw_order(2001, "VASO-01"))]);
    let item_id = enqueue(&h, "2001");

    let report = h.processor.run_once().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 0);
    assert!(h.store.get_item(&item_id).unwrap().is_none());

    let order = h.store.get_order("2001").unwrap().unwrap();
    assert!(order.ml_cached_at.unwrap() > stale);
    assert_eq!(order.ml_cached_data.unwrap().title, "Peça 2001");
    assert_eq!(order.fulfillment.internal_status, Some(FulfillmentStatus::Printing));
    assert_eq!(order.fulfillment.internal_notes.as_deref(), Some("white PLA"));
    assert_eq!(order.created_at, stale);
  }

  #[tokio::test]
  async fn upstream_500_reschedules_with_error() {
    let h = harness(QueueConfig::default());
    seed_order(&h.store, "2002", minutes_ago(30));
    h.marketplace.script("2002", vec![Reply::Status(500)]);
    let item_id = enqueue(&h, "2002");

    let report = h.processor.run_once().await.unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 1);

    let item = h.store.get_item(&item_id).unwrap().unwrap();
    assert_eq!(item.retry_count, 1);
    assert_eq!(item.status, QueueStatus::Pending);
    assert!(item.last_error.unwrap().contains("500"));
  }

  #[tokio::test]
  async fn two_failures_then_success_leaves_no_item() {
    let h = harness(QueueConfig::default());
    seed_order(&h.store, "2003", minutes_ago(30));
    h.marketplace.script(
      "2003",
      vec![
        Reply::Status(502),
        Reply::Status(503),
        Reply::Order(raw_order(2003, "VASO-01")),
      ],
    );
    let item_id = enqueue(&h, "2003");

    for _ in 0..2 {
      let report = h.processor.run_once().await.unwrap();
      assert_eq!(report.processed, 0);
      assert_eq!(report.remaining, 1);
    }
    let report = h.processor.run_once().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.remaining, 0);
    assert!(h.store.get_item(&item_id).unwrap().is_none());
  }

  #[tokio::test]
  async fn three_failures_drop_the_item() {
    let h = harness(QueueConfig::default());
    seed_order(&h.store, "2004", minutes_ago(30));
    h.marketplace.script("2004", vec![Reply::Status(500)]);
    let item_id = enqueue(&h, "2004");

    let mut failed = 0;
    for _ in 0..3 {
      failed += h.processor.run_once().await.unwrap().failed;
    }

    assert_eq!(failed, 1);
    assert!(h.store.get_item(&item_id).unwrap().is_none());
    assert_eq!(h.store.count_pending().unwrap(), 0);

    let report = h.processor.run_once().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(h.marketplace.order_fetches(), 3);
  }

  #[tokio::test]
  async fn duplicate_items_converge_to_same_state() {
    let h = harness(QueueConfig::default());
    seed_order(&h.store, "2005", minutes_ago(30));
    h.marketplace
      .script("2005", vec![Reply::Order(raw_order(2005, "VASO-01"))]);

    enqueue(&h, "2005");
    h.processor.run_once().await.unwrap();
    let once = h.store.get_order("2005").unwrap().unwrap();

    enqueue(&h, "2005");
    enqueue(&h, "2005");
    let report = h.processor.run_once().await.unwrap();
    let thrice = h.store.get_order("2005").unwrap().unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(once.ml_cached_data, thrice.ml_cached_data);
    assert_eq!(once.fulfillment, thrice.fulfillment);
    assert_eq!(once.sku, thrice.sku);
    assert_eq!(once.created_at, thrice.created_at);
  }

  #[tokio::test]
  async fn batch_size_bounds_work_per_run() {
    let h = harness(QueueConfig {
      batch_size: 2,
      ..QueueConfig::default()
    });
    for id in ["1", "2", "3"] {
      seed_order(&h.store, id, minutes_ago(30));
      h.marketplace
        .script(id, vec![Reply::Order(raw_order(id.parse().unwrap(), "X"))]);
      enqueue(&h, id);
    }

    let report = h.processor.run_once().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.remaining, 1);
  }

  #[tokio::test]
  async fn exhausted_budget_processes_nothing() {
    let h = harness(QueueConfig {
      time_budget_ms: 0,
      ..QueueConfig::default()
    });
    seed_order(&h.store, "2006", minutes_ago(30));
    h.marketplace
      .script("2006", vec![Reply::Order(raw_order(2006, "X"))]);
    enqueue(&h, "2006");

    let report = h.processor.run_once().await.unwrap();

    assert_eq!(report.processed, 0);
    assert_eq!(h.marketplace.order_fetches(), 0);
    assert_eq!(report.remaining, 1);
  }

  #[tokio::test]
  async fn old_items_are_purged_first() {
    let h = harness(QueueConfig::default());
    h.processor
      .queue()
      .enqueue(
        &["gone".to_string()],
        DEFAULT_PRIORITY,
        minutes_ago(120),
      )
      .unwrap();

    let report = h.processor.run_once().await.unwrap();

    assert_eq!(report.cleaned_up, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(h.marketplace.order_fetches(), 0);
  }

  #[tokio::test]
  async fn missing_credentials_fail_the_run() {
    let h = harness_with_tokens(QueueConfig::default(), StaticTokens::missing());
    enqueue(&h, "2007");

    let err = h.processor.run_once().await.unwrap_err();
    assert!(err.to_string().contains("access token"));
    assert_eq!(h.store.count_pending().unwrap(), 1);
  }

  #[tokio::test]
  async fn rejected_token_is_invalidated() {
    let h = harness(QueueConfig::default());
    seed_order(&h.store, "2008", minutes_ago(30));
    h.marketplace.script("2008", vec![Reply::Status(401)]);
    enqueue(&h, "2008");

    h.processor.run_once().await.unwrap();
    assert_eq!(h.tokens.invalidated(), 1);
  }
}

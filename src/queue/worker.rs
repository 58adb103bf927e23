//! Background consumer of refresh events.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

use crate::db::{OrderStore, QueueStore};
use crate::event::{Event, EventHandler};

use super::{QueueProcessor, DEFAULT_PRIORITY};

/// Turns stale-order hand-offs into queue items and drives the processor.
/// Every failure is logged and swallowed; the bulk sync is the backstop.
pub struct RefreshWorker<S> {
  processor: Arc<QueueProcessor<S>>,
  events: EventHandler,
}

impl<S: OrderStore + QueueStore + 'static> RefreshWorker<S> {
  pub fn new(processor: Arc<QueueProcessor<S>>, events: EventHandler) -> Self {
    Self { processor, events }
  }

  /// Run for the life of the process.
  pub async fn run(mut self) {
    info!("Refresh worker started");
    while let Some(event) = self.events.next().await {
      self.handle(event).await;
    }
    info!("Refresh worker stopped");
  }

  async fn handle(&self, event: Event) {
    if let Event::Stale(order_ids) = &event {
      self.enqueue(order_ids);
    }

    match self.processor.run_once().await {
      Ok(report) if report.processed > 0 || report.failed > 0 => info!(
        processed = report.processed,
        failed = report.failed,
        remaining = report.remaining,
        "Refresh batch done"
      ),
      Ok(_) => {}
      Err(e) => error!("Refresh batch failed: {}", e),
    }
  }

  fn enqueue(&self, order_ids: &[String]) {
    if let Err(e) = self
      .processor
      .queue()
      .enqueue(order_ids, DEFAULT_PRIORITY, Utc::now())
    {
      error!(count = order_ids.len(), "Failed to enqueue stale orders: {}", e);
    }
  }

  /// Enqueue whatever was dispatched so far without processing it. Used by
  /// one-shot commands that exit before a batch could run.
  pub fn flush_pending(&mut self) -> usize {
    let mut flushed = 0;
    for event in self.events.drain() {
      if let Event::Stale(order_ids) = event {
        flushed += order_ids.len();
        self.enqueue(&order_ids);
      }
    }
    flushed
  }
}

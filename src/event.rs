use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Work signals for the refresh worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Orders served from a stale cache, to be enqueued and refreshed
  Stale(Vec<String>),
  /// Periodic trigger to drain the refresh queue
  Tick,
}

/// Cheap, cloneable handle the read path uses to hand stale ids off without
/// waiting on the outcome.
#[derive(Debug, Clone)]
pub struct RefreshDispatcher {
  tx: mpsc::UnboundedSender<Event>,
}

impl RefreshDispatcher {
  /// Never blocks. A closed channel is logged and otherwise ignored.
  pub fn dispatch(&self, order_ids: Vec<String>) {
    if order_ids.is_empty() {
      return;
    }

    let count = order_ids.len();
    if self.tx.send(Event::Stale(order_ids)).is_err() {
      warn!(count, "Refresh worker is gone, stale orders wait for the next sync");
    } else {
      debug!(count, "Dispatched stale orders for refresh");
    }
  }
}

/// Event source feeding the refresh worker: stale-order hand-offs plus an
/// optional tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let handler = Self::without_ticks();
    let tx = handler.tx.clone();

    // Spawn tick timer
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
      // First tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    handler
  }

  /// Handler that only carries dispatched events
  pub fn without_ticks() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  pub fn dispatcher(&self) -> RefreshDispatcher {
    RefreshDispatcher {
      tx: self.tx.clone(),
    }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }

  /// Take every event already queued, without waiting
  pub fn drain(&mut self) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn dispatch_is_received_in_order() {
    let mut events = EventHandler::without_ticks();
    let dispatcher = events.dispatcher();

    dispatcher.dispatch(vec!["1".into()]);
    dispatcher.dispatch(vec![]);
    dispatcher.dispatch(vec!["2".into(), "3".into()]);

    assert_eq!(events.next().await, Some(Event::Stale(vec!["1".into()])));
    assert_eq!(
      events.drain(),
      vec![Event::Stale(vec!["2".into(), "3".into()])]
    );
  }

  #[tokio::test]
  async fn dispatch_after_handler_dropped_does_not_panic() {
    let events = EventHandler::without_ticks();
    let dispatcher = events.dispatcher();
    drop(events);

    dispatcher.dispatch(vec!["1".into()]);
  }

  #[tokio::test]
  async fn ticks_arrive_on_schedule() {
    let mut events = EventHandler::new(Duration::from_millis(10));
    let event = tokio::time::timeout(Duration::from_secs(2), events.next())
      .await
      .unwrap();
    assert_eq!(event, Some(Event::Tick));
  }
}

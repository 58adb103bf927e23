//! HTTP surface and the background tasks that replace external schedulers.

mod error;
mod routes;

use axum::{
  routing::{get, patch, post},
  Router,
};
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::app::App;
use crate::event::EventHandler;

pub fn router(app: Arc<App>) -> Router {
  let api = Router::new()
    .route("/health", get(routes::health))
    .route("/orders", get(routes::list_orders))
    .route("/orders/{id}", patch(routes::edit_order))
    .route("/orders/process-queue", post(routes::process_queue))
    .route("/sync", get(routes::sync).post(routes::sync))
    .route("/queue/cleanup", get(routes::cleanup_queue).post(routes::cleanup_queue))
    .route("/auth/check", get(routes::auth_check));

  Router::new()
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
    .with_state(app)
}

/// Run `task` every `period`, skipping missed ticks. A zero period disables
/// the task.
fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, task: F)
where
  F: Fn() -> Fut + Send + 'static,
  Fut: Future<Output = ()> + Send,
{
  if period.is_zero() {
    info!(task = name, "Periodic task disabled");
    return;
  }

  tokio::spawn(async move {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
      interval.tick().await;
      task().await;
    }
  });
  info!(task = name, every_secs = period.as_secs(), "Periodic task scheduled");
}

fn spawn_background(app: &Arc<App>, events: EventHandler) {
  tokio::spawn(app.worker(events).run());

  let server = &app.config().server;

  let sync_app = app.clone();
  spawn_periodic(
    "sync",
    Duration::from_secs(server.sync_interval_secs),
    move || {
      let app = sync_app.clone();
      async move {
        match app.sync_orders().await {
          Ok(report) => info!(
            found = report.total_found,
            new = report.total_synced,
            updated = report.total_updated,
            skipped = report.total_skipped,
            "Scheduled sync done"
          ),
          Err(e) => error!("Scheduled sync failed: {:#}", e),
        }
      }
    },
  );

  let cleanup_app = app.clone();
  spawn_periodic(
    "queue-cleanup",
    Duration::from_secs(server.cleanup_interval_secs),
    move || {
      let app = cleanup_app.clone();
      async move {
        if let Err(e) = app.cleanup_queue() {
          error!("Scheduled queue cleanup failed: {:#}", e);
        }
      }
    },
  );
}

/// Serve the API until Ctrl-C, with the refresh worker and the periodic
/// sync and cleanup running alongside.
pub async fn serve(app: Arc<App>, events: EventHandler) -> Result<()> {
  let addr = app.config().server.listen;
  spawn_background(&app, events);

  let listener = TcpListener::bind(addr)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", addr, e))?;
  info!("Listening on http://{}", addr);

  axum::serve(listener, router(app))
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!("Shutting down");
    })
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  Ok(())
}

mod app;
mod cache;
mod config;
mod db;
mod event;
mod marketplace;
mod orders;
mod queue;
mod server;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::App;
use crate::config::{Config, LoggingConfig};
use crate::event::EventHandler;
use crate::orders::ListRequest;

#[derive(Parser, Debug)]
#[command(name = "orderdesk")]
#[command(about = "Local cache and refresh queue for marketplace orders")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/orderdesk/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Serve the HTTP API with the refresh worker, periodic sync and cleanup
  Serve,
  /// Pull recent orders from the marketplace into the cache
  Sync,
  /// Run one refresh queue batch
  ProcessQueue,
  /// Delete queue items past the maximum age
  CleanupQueue,
  /// List cached orders; stale ones are queued for refresh
  Orders {
    #[arg(long, default_value_t = 0)]
    offset: u64,
    #[arg(long, default_value_t = orders::read::DEFAULT_LIMIT)]
    limit: u64,
    /// Only orders with this SKU
    #[arg(long)]
    sku: Option<String>,
  },
  /// Check the marketplace credentials
  AuthCheck,
}

/// Install the global subscriber. The returned guard flushes file logs and
/// must live until exit.
fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&logging.filter))
    .map_err(|e| eyre!("Invalid log filter {}: {}", logging.filter, e))?;

  match &logging.directory {
    Some(directory) => {
      let appender = tracing_appender::rolling::daily(directory, "orderdesk.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to serialize output: {}", e))?;
  println!("{}", json);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(&config.logging)?;

  match args.command {
    Command::Serve => {
      let tick = Duration::from_secs(config.server.queue_interval_secs);
      let events = if tick.is_zero() {
        EventHandler::without_ticks()
      } else {
        EventHandler::new(tick)
      };
      let app = Arc::new(App::new(config, events.dispatcher())?);
      server::serve(app, events).await?;
    }
    Command::Sync => {
      let app = App::new(config, EventHandler::without_ticks().dispatcher())?;
      print_json(&app.sync_orders().await?)?;
    }
    Command::ProcessQueue => {
      let app = App::new(config, EventHandler::without_ticks().dispatcher())?;
      print_json(&app.process_queue().await?)?;
    }
    Command::CleanupQueue => {
      let app = App::new(config, EventHandler::without_ticks().dispatcher())?;
      print_json(&app.cleanup_queue()?)?;
    }
    Command::Orders { offset, limit, sku } => {
      let events = EventHandler::without_ticks();
      let app = App::new(config, events.dispatcher())?;
      let page = app.list_orders(&ListRequest { offset, limit, sku })?;
      print_json(&page)?;

      let queued = app.worker(events).flush_pending();
      if queued > 0 {
        info!(count = queued, "Queued stale orders for refresh");
      }
    }
    Command::AuthCheck => {
      let app = App::new(config, EventHandler::without_ticks().dispatcher())?;
      print_json(&app.auth_check().await?)?;
    }
  }

  Ok(())
}

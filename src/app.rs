use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::cache::CachePolicy;
use crate::config::{Config, Credentials};
use crate::db::SqliteStore;
use crate::event::{EventHandler, RefreshDispatcher};
use crate::marketplace::{AccessTokenSource, Marketplace, MarketplaceClient, SellerIdentity, TokenManager};
use crate::orders::edit::{self, EditOutcome};
use crate::orders::types::Fulfillment;
use crate::orders::{BulkSync, ListRequest, OrderPage, OrderReader, SyncReport};
use crate::queue::{ProcessReport, QueueProcessor, RefreshWorker};

/// Result of the queue purge maintenance operation
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
  pub success: bool,
  pub deleted: usize,
  pub timestamp: DateTime<Utc>,
}

/// The order cache services, wired once and shared by the CLI and the HTTP
/// server
pub struct App {
  config: Config,
  store: Arc<SqliteStore>,
  marketplace: Arc<dyn Marketplace>,
  tokens: Arc<dyn AccessTokenSource>,
  reader: OrderReader<SqliteStore>,
  sync: BulkSync<SqliteStore>,
  processor: Arc<QueueProcessor<SqliteStore>>,
}

impl App {
  /// Open the database and build the marketplace client from configuration
  /// and environment credentials.
  pub fn new(config: Config, dispatcher: RefreshDispatcher) -> Result<Self> {
    let db_path = config.database_path()?;
    let store = Arc::new(SqliteStore::open(&db_path)?);
    info!(path = %db_path.display(), "Opened order database");

    let client = MarketplaceClient::new(&config.marketplace)?;
    let tokens = Arc::new(TokenManager::new(client.clone(), Credentials::from_env()));

    Ok(Self::with_parts(
      config,
      store,
      Arc::new(client),
      tokens,
      dispatcher,
    ))
  }

  pub fn with_parts(
    config: Config,
    store: Arc<SqliteStore>,
    marketplace: Arc<dyn Marketplace>,
    tokens: Arc<dyn AccessTokenSource>,
    dispatcher: RefreshDispatcher,
  ) -> Self {
    let policy = CachePolicy::new(config.cache.ttl()).with_warning_age(config.cache.warning_age());
    let reader = OrderReader::new(
      store.clone(),
      policy,
      dispatcher,
      config.queue.max_enqueue,
    );
    let sync = BulkSync::new(
      store.clone(),
      marketplace.clone(),
      tokens.clone(),
      config.sync.clone(),
    );
    let processor = Arc::new(QueueProcessor::new(
      store.clone(),
      marketplace.clone(),
      tokens.clone(),
      &config.queue,
    ));

    Self {
      config,
      store,
      marketplace,
      tokens,
      reader,
      sync,
      processor,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Worker consuming the events whose dispatcher was handed to `new`
  pub fn worker(&self, events: EventHandler) -> RefreshWorker<SqliteStore> {
    RefreshWorker::new(self.processor.clone(), events)
  }

  pub fn list_orders(&self, request: &ListRequest) -> Result<OrderPage> {
    self.reader.list_orders(request)
  }

  pub fn edit_order(&self, order_id: &str, edit: &Fulfillment) -> Result<EditOutcome> {
    edit::apply_manual_edit(self.store.as_ref(), order_id, edit, Utc::now())
  }

  pub async fn sync_orders(&self) -> Result<SyncReport> {
    self.sync.run().await
  }

  pub async fn process_queue(&self) -> Result<ProcessReport> {
    self.processor.run_once().await
  }

  /// Delete every queue item past the maximum age, whatever its status.
  pub fn cleanup_queue(&self) -> Result<CleanupReport> {
    let now = Utc::now();
    let purged = self
      .processor
      .queue()
      .purge_older_than(self.config.queue.max_age(), None, now)?;

    for item in &purged {
      info!(
        item_id = %item.id,
        order_id = %item.order_id,
        status = item.status.as_str(),
        "Deleted old queue item"
      );
    }

    Ok(CleanupReport {
      success: true,
      deleted: purged.len(),
      timestamp: now,
    })
  }

  /// Obtain a token and resolve the seller it belongs to.
  pub async fn auth_check(&self) -> Result<SellerIdentity> {
    let token = self.tokens.valid_token().await?;
    Ok(self.marketplace.current_user(&token).await?)
  }
}

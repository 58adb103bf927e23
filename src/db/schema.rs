/// Schema for the order cache and the refresh queue.
pub const SCHEMA: &str = r#"
-- Order documents (JSON), keyed by the upstream order id.
-- sku and synced_at are copied out of the document for filtering and ordering.
CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    sku TEXT NOT NULL DEFAULT '',
    synced_at INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_orders_synced ON orders(synced_at DESC);
CREATE INDEX IF NOT EXISTS idx_orders_sku_synced ON orders(sku, synced_at DESC);

-- Pending cache refreshes. Timestamps are epoch milliseconds.
CREATE TABLE IF NOT EXISTS refresh_queue (
    id TEXT PRIMARY KEY,
    order_id TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    processed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_refresh_queue_pending
    ON refresh_queue(status, priority DESC, created_at);
CREATE INDEX IF NOT EXISTS idx_refresh_queue_created ON refresh_queue(created_at);
"#;

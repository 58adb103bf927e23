//! Order cache: stored documents, the cache-only read path, the bulk sync
//! from the marketplace, and manual fulfillment edits.

pub mod edit;
pub mod read;
pub mod sync;
pub mod types;

pub use read::{ListRequest, OrderPage, OrderReader};
pub use sync::{BulkSync, SyncReport};

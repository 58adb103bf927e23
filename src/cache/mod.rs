//! Cache rules for marketplace orders.
//!
//! - `freshness`: pure TTL/age/warning evaluation
//! - `extract`: projection of raw upstream orders and the patches that write it

pub mod extract;
pub mod freshness;

pub use freshness::CachePolicy;

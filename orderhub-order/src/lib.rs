pub mod cache_policy;
pub mod merge;
pub mod service;

pub use cache_policy::{CachePolicy, CacheSettings, CacheStats};
pub use merge::merge_orders;
pub use service::{OrderService, Reconciliation, ReconcileSettings, ServiceHealth};

use async_trait::async_trait;
use orderhub_shared::Order;

/// Key prefix under which order snapshots live in the cache.
pub const ORDER_KEY_PREFIX: &str = "order:";

/// Pattern matching every cached order key.
pub const ORDER_KEY_PATTERN: &str = "order:*";

pub fn order_key(order_uid: &str) -> String {
    format!("{}{}", ORDER_KEY_PREFIX, order_uid)
}

/// Inverse of [`order_key`].
pub fn uid_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(ORDER_KEY_PREFIX)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order not found")]
    NotFound,
    #[error("order already exists")]
    Conflict,
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
    #[error("cache codec failure: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("order {0} was not written to the cache")]
    NotStored(String),
}

/// Durable store of record for orders.
///
/// Writes that touch the order and its delivery, payment and items must be
/// atomic: either every table is written or none is.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_by_id(&self, order_uid: &str) -> StoreResult<Order>;

    /// Inserts a new order and returns it with the generated id and
    /// system timestamps. Reports `Conflict` if the uid is already taken.
    async fn create(&self, order: &Order) -> StoreResult<Order>;

    /// Replaces the stored snapshot of an existing order, sub-records included.
    async fn update(&self, order: &Order) -> StoreResult<()>;

    async fn exists_by_id(&self, order_uid: &str) -> StoreResult<bool>;

    /// Up to `limit` orders, most recently created first.
    async fn list_recent_for_cache_preload(&self, limit: usize) -> StoreResult<Vec<Order>>;

    async fn delete(&self, order_uid: &str) -> StoreResult<()>;

    async fn health(&self) -> StoreResult<()>;
}

/// Bounded key/value cache of order snapshots, keyed by [`order_key`].
#[async_trait]
pub trait OrderCache: Send + Sync {
    /// `Ok(None)` on a miss.
    async fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError>;

    /// Writes every order and returns how many were stored successfully.
    async fn set_many(&self, orders: &[Order]) -> usize;

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn health(&self) -> Result<(), CacheError>;
}

/// Glob matching for the subset of patterns used with `list_keys`:
/// a literal, or a literal prefix followed by `*`.
pub fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_key_format() {
        assert_eq!(order_key("b563feb7b2b84b6test"), "order:b563feb7b2b84b6test");
        assert!(key_matches(ORDER_KEY_PATTERN, &order_key("abc")));
        assert_eq!(uid_from_key("order:abc"), Some("abc"));
        assert_eq!(uid_from_key("session:abc"), None);
    }

    #[test]
    fn test_key_matches_literal_and_prefix() {
        assert!(key_matches("order:1", "order:1"));
        assert!(!key_matches("order:1", "order:12"));
        assert!(key_matches("order:*", "order:12"));
        assert!(!key_matches("order:*", "session:12"));
    }
}

use std::sync::Arc;

use orderhub_core::repository::{order_key, uid_from_key, ORDER_KEY_PATTERN};
use orderhub_core::{CacheError, CoreError, CoreResult, OrderCache, OrderStore};
use orderhub_shared::Order;
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Upper bound on cached order snapshots.
    pub max_orders: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cached_orders: usize,
    pub max_orders: usize,
}

/// Keeps the order cache populated while holding it to `max_orders` entries.
///
/// Eviction picks an arbitrary subset of the current keys (whatever the
/// backend lists first). It is a capacity valve, not a recency policy.
pub struct CachePolicy {
    cache: Arc<dyn OrderCache>,
    max_orders: usize,
}

impl CachePolicy {
    pub fn new(cache: Arc<dyn OrderCache>, settings: CacheSettings) -> Self {
        Self {
            cache,
            max_orders: settings.max_orders,
        }
    }

    pub fn max_orders(&self) -> usize {
        self.max_orders
    }

    /// Cached snapshot for `order_uid`; backend errors read as a miss.
    pub async fn get(&self, order_uid: &str) -> Option<Order> {
        match self.cache.get(order_uid).await {
            Ok(order) => order,
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", order_uid, e);
                None
            }
        }
    }

    /// Makes room for `incoming` new entries, returning how many were evicted.
    ///
    /// Fails if fewer entries could be removed than the bound requires.
    pub async fn ensure_space(&self, incoming: usize) -> Result<usize, CacheError> {
        let keys = self.cache.list_keys(ORDER_KEY_PATTERN).await?;
        self.evict_over_bound(keys, incoming).await
    }

    async fn evict_over_bound(&self, keys: Vec<String>, incoming: usize) -> Result<usize, CacheError> {
        let current = keys.len();
        if current + incoming <= self.max_orders {
            return Ok(0);
        }
        let needed = current + incoming - self.max_orders;
        let removed = self.evict(keys, needed).await?;
        if removed < needed {
            return Err(CacheError::Backend(format!("evicted {removed} of {needed}")));
        }
        Ok(removed)
    }

    async fn evict(&self, keys: Vec<String>, count: usize) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys.into_iter().take(count) {
            match self.cache.delete(&key).await {
                Ok(()) => {
                    removed += 1;
                    debug!("Evicted cached order {}", uid_from_key(&key).unwrap_or(&key));
                }
                Err(e) => error!("Failed to evict cache key {}: {}", key, e),
            }
        }
        if removed > 0 {
            info!("Evicted {} cached orders", removed);
        }
        Ok(removed)
    }

    /// Caches a single order, evicting first if the cache is full.
    ///
    /// Refreshing an order that is already cached does not take a new slot.
    /// Nothing is written when eviction could not make room.
    pub async fn add_one(&self, order: &Order) -> Result<(), CacheError> {
        let key = order_key(&order.order_uid);
        // An existing entry for this order is replaced in place, so it is
        // neither an eviction candidate nor a new slot.
        let others: Vec<String> = self
            .cache
            .list_keys(ORDER_KEY_PATTERN)
            .await?
            .into_iter()
            .filter(|k| *k != key)
            .collect();
        self.evict_over_bound(others, 1).await?;

        if self.cache.set_many(std::slice::from_ref(order)).await == 0 {
            return Err(CacheError::NotStored(order.order_uid.clone()));
        }
        debug!("Order {} added to cache", order.order_uid);
        Ok(())
    }

    /// Startup warm-up: loads up to `limit` of the most recently created
    /// orders, never exceeding the configured bound.
    ///
    /// If the cache is already at or above capacity, entries are evicted
    /// until one slot is free, then the remaining capacity is filled.
    pub async fn populate_from_store(&self, store: &dyn OrderStore, limit: usize) -> CoreResult<usize> {
        let keys = match self.cache.list_keys(ORDER_KEY_PATTERN).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list cached orders before warm-up: {}", e);
                return Ok(0);
            }
        };
        let mut cached = keys.len();
        info!("Cache holds {} of {} orders before warm-up", cached, self.max_orders);

        if cached >= self.max_orders {
            let excess = cached - self.max_orders + 1;
            match self.evict(keys, excess).await {
                Ok(removed) => cached -= removed,
                Err(e) => warn!("Failed to trim cache before warm-up: {}", e),
            }
        }

        let free = self.max_orders.saturating_sub(cached);
        let wanted = free.min(limit);
        if wanted == 0 {
            info!("No free cache slots for warm-up");
            return Ok(0);
        }

        let orders = store.list_recent_for_cache_preload(wanted).await.map_err(|e| {
            error!("Failed to load orders for cache warm-up: {}", e);
            CoreError::InternalError("failed to load orders for cache".to_string())
        })?;

        if orders.is_empty() {
            info!("No orders to load into cache");
            return Ok(0);
        }

        let added = self.cache.set_many(&orders).await;
        info!(
            "Orders loaded into cache: requested={} added={} max={}",
            orders.len(),
            added,
            self.max_orders
        );
        Ok(added)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let keys = self.cache.list_keys(ORDER_KEY_PATTERN).await?;
        Ok(CacheStats {
            cached_orders: keys.len(),
            max_orders: self.max_orders,
        })
    }

    pub async fn health(&self) -> Result<(), CacheError> {
        self.cache.health().await
    }
}

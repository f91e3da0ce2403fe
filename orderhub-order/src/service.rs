use std::sync::Arc;

use orderhub_core::validation::validate_order_uid;
use orderhub_core::{CoreError, CoreResult, OrderCache, OrderStore, StoreError};
use orderhub_shared::Order;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache_policy::{CachePolicy, CacheSettings, CacheStats};
use crate::merge::merge_orders;

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// How many times a lost create race is retried as an update.
    pub conflict_retries: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self { conflict_retries: 1 }
    }
}

/// What `create_or_update` did with the incoming order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reconciliation {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub store: bool,
    pub cache: bool,
}

/// Order reconciliation service shared by the feed worker and the HTTP API.
///
/// Holds no mutable state of its own; all state lives in the store and
/// cache collaborators, so one instance can serve concurrent callers.
/// Dropping an in-flight call abandons it; store writes stay atomic.
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: CachePolicy,
    settings: ReconcileSettings,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn OrderCache>,
        cache_settings: CacheSettings,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            cache: CachePolicy::new(cache, cache_settings),
            settings,
        }
    }

    pub fn cache(&self) -> &CachePolicy {
        &self.cache
    }

    /// Cache-first lookup with store fallback. A store hit is written back
    /// to the cache on a best-effort basis.
    pub async fn get_by_id(&self, order_uid: &str) -> CoreResult<Order> {
        if let Err(e) = validate_order_uid(order_uid) {
            warn!("Invalid order uid {:?}: {}", order_uid, e);
            return Err(e);
        }

        if let Some(order) = self.cache.get(order_uid).await {
            info!("Order {} served from cache", order_uid);
            return Ok(order);
        }

        let order = self.store.get_by_id(order_uid).await.map_err(|e| match e {
            StoreError::NotFound => CoreError::NotFound(format!("order {}", order_uid)),
            other => {
                error!("Failed to get order {} from store: {}", order_uid, other);
                CoreError::InternalError("failed to retrieve order".to_string())
            }
        })?;

        self.refresh_cache(&order, "read").await;
        info!("Order {} served from store", order_uid);
        Ok(order)
    }

    /// Inserts `order` if its uid is unknown, otherwise merges it into the
    /// stored snapshot and persists the result.
    ///
    /// On success `order` holds the reconciled snapshot as stored.
    pub async fn create_or_update(&self, order: &mut Order) -> CoreResult<Reconciliation> {
        let mut retries_left = self.settings.conflict_retries;

        loop {
            match self.get_by_id(&order.order_uid).await {
                Ok(existing) => {
                    self.apply_update(&existing, order).await?;
                    return Ok(Reconciliation::Updated);
                }
                Err(e) if e.is_not_found() => match self.insert(order).await {
                    Ok(()) => return Ok(Reconciliation::Created),
                    Err(CoreError::Conflict(reason)) if retries_left > 0 => {
                        retries_left -= 1;
                        warn!(
                            "Order {} was created concurrently ({}), retrying as update",
                            order.order_uid, reason
                        );
                    }
                    Err(e) => return Err(e),
                },
                Err(e) => {
                    error!("Failed to check existing order {}: {}", order.order_uid, e);
                    return Err(e);
                }
            }
        }
    }

    async fn insert(&self, order: &mut Order) -> CoreResult<()> {
        info!("Creating new order {}", order.order_uid);

        let stored = self.store.create(order).await.map_err(|e| match e {
            StoreError::Conflict => {
                info!("Order {} already exists in store", order.order_uid);
                CoreError::Conflict(format!("order {} already exists", order.order_uid))
            }
            other => {
                error!("Failed to create order {}: {}", order.order_uid, other);
                CoreError::InternalError("failed to create order".to_string())
            }
        })?;

        *order = stored;
        self.refresh_cache(order, "create").await;
        info!("Order {} created", order.order_uid);
        Ok(())
    }

    async fn apply_update(&self, existing: &Order, order: &mut Order) -> CoreResult<()> {
        info!("Order {} already exists, merging update", order.order_uid);

        let merged = merge_orders(existing, order);
        self.store.update(&merged).await.map_err(|e| match e {
            StoreError::NotFound => CoreError::NotFound(format!("order {}", merged.order_uid)),
            other => {
                error!("Failed to update order {}: {}", merged.order_uid, other);
                CoreError::InternalError("failed to update order".to_string())
            }
        })?;

        *order = merged;
        self.refresh_cache(order, "update").await;
        info!("Order {} updated", order.order_uid);
        Ok(())
    }

    async fn refresh_cache(&self, order: &Order, after: &str) {
        if let Err(e) = self.cache.add_one(order).await {
            warn!("Failed to cache order {} after {}: {}", order.order_uid, after, e);
        }
    }

    /// Fills the cache with the most recent orders, up to its bound.
    pub async fn warm_cache(&self) -> CoreResult<usize> {
        self.cache
            .populate_from_store(self.store.as_ref(), self.cache.max_orders())
            .await
    }

    pub async fn cache_stats(&self) -> CoreResult<CacheStats> {
        self.cache.stats().await.map_err(|e| {
            error!("Failed to read cache stats: {}", e);
            CoreError::InternalError("failed to read cache stats".to_string())
        })
    }

    pub async fn health(&self) -> ServiceHealth {
        let store = match self.store.health().await {
            Ok(()) => true,
            Err(e) => {
                error!("Store health check failed: {}", e);
                false
            }
        };
        let cache = match self.cache.health().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Cache health check failed: {}", e);
                false
            }
        };
        ServiceHealth { store, cache }
    }

    /// Ownership stub: a caller may only see its own orders.
    /// Not an authorization boundary.
    pub fn can_access_customer_orders(customer_id: &str, requesting_user_id: &str) -> bool {
        customer_id == requesting_user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_stub() {
        assert!(OrderService::can_access_customer_orders("test", "test"));
        assert!(!OrderService::can_access_customer_orders("test", "other"));
    }

    #[test]
    fn test_default_settings_retry_once() {
        assert_eq!(ReconcileSettings::default().conflict_retries, 1);
    }
}

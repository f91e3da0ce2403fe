//! In-process implementations of the store and cache traits.
//!
//! Used by the test suites in place of Postgres and Redis. Both support
//! failure injection so error paths can be exercised deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use orderhub_shared::Order;
use tokio::sync::RwLock;

use crate::repository::{
    key_matches, order_key, CacheError, OrderCache, OrderStore, StoreError, StoreResult,
};

#[derive(Default)]
struct StoreFaults {
    fail_next: bool,
    racer: Option<Order>,
    vanish_on_update: bool,
}

pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
    next_id: AtomicI64,
    reads: AtomicUsize,
    faults: Mutex<StoreFaults>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            reads: AtomicUsize::new(0),
            faults: Mutex::new(StoreFaults::default()),
        }
    }

    /// Number of `get_by_id` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    /// Makes the next store call fail with a backend error.
    pub fn fail_next_call(&self) {
        self.faults().fail_next = true;
    }

    /// Simulates a concurrent writer: right before the next `create`
    /// runs, `racer` is inserted under its own uid.
    pub fn race_next_create(&self, racer: Order) {
        self.faults().racer = Some(racer);
    }

    /// Simulates a concurrent delete: the next `update` finds its row gone.
    pub fn vanish_before_next_update(&self) {
        self.faults().vanish_on_update = true;
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, StoreFaults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_fault(&self) -> StoreResult<()> {
        let mut faults = self.faults();
        if faults.fail_next {
            faults.fail_next = false;
            return Err(StoreError::Backend("injected failure".to_string()));
        }
        Ok(())
    }

    fn stamp_new(&self, order: &Order) -> Order {
        let now = Utc::now();
        let mut stored = order.clone();
        stored.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        stored.created_at = Some(now);
        stored.updated_at = Some(now);
        stored
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_by_id(&self, order_uid: &str) -> StoreResult<Order> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_fault()?;
        self.orders
            .read()
            .await
            .get(order_uid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create(&self, order: &Order) -> StoreResult<Order> {
        self.check_fault()?;
        let racer = self.faults().racer.take();

        let mut orders = self.orders.write().await;
        if let Some(racer) = racer {
            let stored = self.stamp_new(&racer);
            orders.insert(stored.order_uid.clone(), stored);
        }

        if orders.contains_key(&order.order_uid) {
            return Err(StoreError::Conflict);
        }

        let stored = self.stamp_new(order);
        orders.insert(stored.order_uid.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, order: &Order) -> StoreResult<()> {
        self.check_fault()?;
        let vanish = std::mem::take(&mut self.faults().vanish_on_update);

        let mut orders = self.orders.write().await;
        if vanish {
            orders.remove(&order.order_uid);
        }
        let current = orders.get_mut(&order.order_uid).ok_or(StoreError::NotFound)?;

        let (id, created_at) = (current.id, current.created_at);
        *current = order.clone();
        current.id = id;
        current.created_at = created_at;
        if current.updated_at.is_none() {
            current.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn exists_by_id(&self, order_uid: &str) -> StoreResult<bool> {
        self.check_fault()?;
        Ok(self.orders.read().await.contains_key(order_uid))
    }

    async fn list_recent_for_cache_preload(&self, limit: usize) -> StoreResult<Vec<Order>> {
        self.check_fault()?;
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders.truncate(limit);
        Ok(orders)
    }

    async fn delete(&self, order_uid: &str) -> StoreResult<()> {
        self.check_fault()?;
        self.orders
            .write()
            .await
            .remove(order_uid)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn health(&self) -> StoreResult<()> {
        self.check_fault()
    }
}

pub struct InMemoryOrderCache {
    entries: RwLock<HashMap<String, Order>>,
    fail_writes: AtomicBool,
    fail_listing: AtomicBool,
    fail_deletes: AtomicBool,
}

impl InMemoryOrderCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
            fail_listing: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains(&self, order_uid: &str) -> bool {
        self.entries.read().await.contains_key(&order_key(order_uid))
    }

    /// While set, `set_many` stores nothing.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// While set, `list_keys` returns a backend error.
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// While set, `delete` returns a backend error and keeps the entry.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl Default for InMemoryOrderCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderCache for InMemoryOrderCache {
    async fn get(&self, order_uid: &str) -> Result<Option<Order>, CacheError> {
        Ok(self.entries.read().await.get(&order_key(order_uid)).cloned())
    }

    async fn set_many(&self, orders: &[Order]) -> usize {
        if self.fail_writes.load(Ordering::SeqCst) {
            return 0;
        }
        let mut entries = self.entries.write().await;
        for order in orders {
            entries.insert(order_key(&order.order_uid), order.clone());
        }
        orders.len()
    }

    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected listing failure".to_string()));
        }
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|key| key_matches(pattern, key))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected delete failure".to_string()));
        }
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn health(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(uid: &str) -> Order {
        Order {
            order_uid: uid.to_string(),
            track_number: "TRACK".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_create_assigns_id_and_rejects_duplicates() {
        let store = InMemoryOrderStore::new();

        let created = store.create(&order("uid-0000000001")).await.unwrap();
        assert_eq!(created.id, 1);
        assert!(created.created_at.is_some());

        let again = store.create(&order("uid-0000000001")).await;
        assert!(matches!(again, Err(StoreError::Conflict)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_update_keeps_generated_fields() {
        let store = InMemoryOrderStore::new();
        let created = store.create(&order("uid-0000000001")).await.unwrap();

        let mut changed = order("uid-0000000001");
        changed.track_number = "OTHER".to_string();
        store.update(&changed).await.unwrap();

        let stored = store.get_by_id("uid-0000000001").await.unwrap();
        assert_eq!(stored.track_number, "OTHER");
        assert_eq!(stored.id, created.id);
        assert_eq!(stored.created_at, created.created_at);

        let missing = store.update(&order("uid-0000000002")).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_store_update_after_concurrent_delete_is_not_found() {
        let store = InMemoryOrderStore::new();
        store.create(&order("uid-0000000001")).await.unwrap();

        store.vanish_before_next_update();
        let result = store.update(&order("uid-0000000001")).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_injected_failure_is_one_shot() {
        let store = InMemoryOrderStore::new();
        store.fail_next_call();
        assert!(matches!(store.health().await, Err(StoreError::Backend(_))));
        assert!(store.health().await.is_ok());
    }

    #[tokio::test]
    async fn test_store_lists_most_recent_first() {
        let store = InMemoryOrderStore::new();
        for n in 0..4 {
            store.create(&order(&format!("uid-000000000{}", n))).await.unwrap();
        }

        let recent = store.list_recent_for_cache_preload(2).await.unwrap();
        let uids: Vec<&str> = recent.iter().map(|o| o.order_uid.as_str()).collect();
        assert_eq!(uids, vec!["uid-0000000003", "uid-0000000002"]);
    }

    #[tokio::test]
    async fn test_cache_keys_and_failures() {
        let cache = InMemoryOrderCache::new();
        assert_eq!(cache.set_many(&[order("a"), order("b")]).await, 2);

        let mut keys = cache.list_keys("order:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["order:a", "order:b"]);

        cache.fail_writes(true);
        assert_eq!(cache.set_many(&[order("c")]).await, 0);
        assert!(!cache.contains("c").await);

        cache.fail_deletes(true);
        assert!(cache.delete("order:a").await.is_err());
        assert!(cache.contains("a").await);

        cache.fail_listing(true);
        assert!(cache.list_keys("order:*").await.is_err());
    }
}

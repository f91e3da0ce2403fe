use std::sync::Arc;

use orderhub_core::CoreError;
use orderhub_order::{OrderService, Reconciliation};
use orderhub_shared::Order;
use orderhub_store::app_config::KafkaConfig;
use orderhub_store::EventProducer;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("undecodable order payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] CoreError),
}

/// Applies one feed message. Partial orders are accepted: only the uid is
/// checked, everything else goes through the merge.
pub async fn handle_payload(service: &OrderService, payload: &[u8]) -> Result<Reconciliation, FeedError> {
    let mut order: Order = serde_json::from_slice(payload)?;
    let outcome = service.create_or_update(&mut order).await?;
    info!("Feed order {} reconciled: {:?}", order.order_uid, outcome);
    Ok(outcome)
}

/// Consumes the order topic and reconciles every message into the store.
///
/// Offsets are auto-committed, so a message that fails is skipped rather
/// than redelivered; with a dead-letter topic configured it is parked there.
pub struct FeedWorker {
    consumer: StreamConsumer,
    service: Arc<OrderService>,
    dead_letter: Option<(EventProducer, String)>,
}

impl FeedWorker {
    pub fn new(config: &KafkaConfig, service: Arc<OrderService>) -> Result<Self, rdkafka::error::KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()?;

        consumer.subscribe(&[config.topic.as_str()])?;

        let dead_letter = match &config.dead_letter_topic {
            Some(topic) => Some((EventProducer::new(&config.brokers)?, topic.clone())),
            None => None,
        };

        Ok(Self {
            consumer,
            service,
            dead_letter,
        })
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Feed worker started, listening for orders...");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.consumer.recv() => match received {
                    Err(e) => error!("Kafka error: {}", e),
                    Ok(message) => self.process(&message).await,
                }
            }
        }

        info!("Feed worker stopped");
    }

    async fn process(&self, message: &BorrowedMessage<'_>) {
        let Some(payload) = message.payload() else {
            warn!(
                "Skipping empty message at {}/{} offset {}",
                message.topic(),
                message.partition(),
                message.offset()
            );
            return;
        };

        if let Err(e) = handle_payload(&self.service, payload).await {
            match &e {
                FeedError::Decode(_) => warn!("Skipping message at offset {}: {}", message.offset(), e),
                FeedError::Reconcile(_) => error!("Skipping message at offset {}: {}", message.offset(), e),
            }
            self.dead_letter(message.key(), payload, &e).await;
        }
    }

    async fn dead_letter(&self, key: Option<&[u8]>, payload: &[u8], reason: &FeedError) {
        let Some((producer, topic)) = &self.dead_letter else {
            return;
        };
        let key = key.and_then(|k| std::str::from_utf8(k).ok());
        if let Err(e) = producer
            .publish_dead_letter(topic, key, payload, &reason.to_string())
            .await
        {
            debug!("Dead-letter publish failed, message stays skipped: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderhub_core::memory::{InMemoryOrderCache, InMemoryOrderStore};
    use orderhub_core::OrderStore;
    use orderhub_order::{CacheSettings, ReconcileSettings};

    fn service() -> (Arc<InMemoryOrderStore>, OrderService) {
        let store = Arc::new(InMemoryOrderStore::new());
        let service = OrderService::new(
            store.clone(),
            Arc::new(InMemoryOrderCache::new()),
            CacheSettings { max_orders: 5 },
            ReconcileSettings::default(),
        );
        (store, service)
    }

    #[tokio::test]
    async fn test_partial_feed_message_is_accepted() {
        let (store, service) = service();

        let full = br#"{"order_uid":"b563feb7b2b84b6test","track_number":"WBILMTESTTRACK","customer_id":"test",
            "items":[{"chrt_id":9934930,"price":453,"name":"Mascaras","brand":"Vivienne Sabo"}]}"#;
        assert_eq!(handle_payload(&service, full).await.unwrap(), Reconciliation::Created);

        // No items, no customer: fine on the feed, the merge keeps what is stored.
        let partial = br#"{"order_uid":"b563feb7b2b84b6test","track_number":"WBILMNEWTRACK"}"#;
        assert_eq!(handle_payload(&service, partial).await.unwrap(), Reconciliation::Updated);

        let stored = store.get_by_id("b563feb7b2b84b6test").await.unwrap();
        assert_eq!(stored.track_number, "WBILMNEWTRACK");
        assert_eq!(stored.customer_id, "test");
        assert_eq!(stored.items.len(), 1);
    }

    #[tokio::test]
    async fn test_null_sub_records_are_accepted() {
        let (store, service) = service();

        let payload = br#"{"order_uid":"b563feb7b2b84b6test","track_number":"WBILMTESTTRACK",
            "delivery":null,"payment":null,"items":null,"date_created":"0001-01-01T00:00:00Z"}"#;
        assert_eq!(handle_payload(&service, payload).await.unwrap(), Reconciliation::Created);

        let stored = store.get_by_id("b563feb7b2b84b6test").await.unwrap();
        assert!(stored.items.is_empty());
        assert!(stored.date_created.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_payload() {
        let (store, service) = service();
        let result = handle_payload(&service, b"not json").await;
        assert!(matches!(result, Err(FeedError::Decode(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_bad_uid_is_reconcile_error() {
        let (_store, service) = service();
        let result = handle_payload(&service, br#"{"order_uid":"short"}"#).await;
        assert!(matches!(
            result,
            Err(FeedError::Reconcile(CoreError::ValidationError { .. }))
        ));
    }
}

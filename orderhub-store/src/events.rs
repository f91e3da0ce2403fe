use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

/// Header carrying the reason a message was dead-lettered.
pub const DEAD_LETTER_REASON_HEADER: &str = "x-dead-letter-reason";

/// Kafka producer used to park feed messages that could not be applied.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    /// Publishes the raw `payload` to `topic`, tagged with `reason`.
    pub async fn publish_dead_letter(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        reason: &str,
    ) -> Result<(), rdkafka::error::KafkaError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: DEAD_LETTER_REASON_HEADER,
            value: Some(reason),
        });
        let mut record = FutureRecord::to(topic).payload(payload).headers(headers);
        if let Some(key) = key {
            record = record.key(key);
        }

        match self.producer.send(record, Timeout::After(Duration::from_secs(5))).await {
            Ok(delivery) => {
                info!(
                    "Dead-lettered message to {}: partition {} offset {}",
                    topic, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to dead-letter message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

//! Kafka transport for `*kafka_json_map`
//!
//! `export_path` holds the bootstrap servers; the topic comes from the
//! `kafkaTopic` option.

use async_trait::async_trait;
use ees_core::config::{opts, EventExporterCfg};
use ees_core::{EesError, EesResult};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::warn;

use super::broker::{BrokerConnection, BrokerConnector};

const DEFAULT_TOPIC: &str = "cgrates";
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaConnector;

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(&self, cfg: &EventExporterCfg) -> EesResult<Box<dyn BrokerConnection>> {
        let topic = cfg
            .opts
            .get_str(opts::KAFKA_TOPIC)
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.export_path)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| EesError::Connection(e.to_string()))?;
        Ok(Box::new(KafkaConnection { producer, topic }))
    }
}

struct KafkaConnection {
    producer: FutureProducer,
    topic: String,
}

#[async_trait]
impl BrokerConnection for KafkaConnection {
    async fn publish(&self, body: &[u8], key: Option<&str>) -> EesResult<()> {
        let mut record = FutureRecord::<str, [u8]>::to(&self.topic).payload(body);
        if let Some(key) = key {
            record = record.key(key);
        }
        self.producer
            .send(record, Timeout::Never)
            .await
            .map_err(|(e, _)| EesError::Export(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> EesResult<()> {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| EesError::Internal(e.to_string()))?;
        if let Err(e) = flushed {
            warn!("<EEs> kafka flush on topic <{}> failed: {}", self.topic, e);
        }
        Ok(())
    }
}

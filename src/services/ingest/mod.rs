use crate::config::KafkaConfig;
use crate::error::PipelineError;
use crate::models::{Event, IndexMapping};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Source of raw interaction events. A batch ends when nothing more is
/// available within the poll timeout; that is a normal boundary, not an
/// error.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn next_batch(&self) -> Result<Vec<Event>, PipelineError>;
}

pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
    poll_timeout: Duration,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaConfig) -> Result<Self, PipelineError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .create()
            .map_err(|e| PipelineError::Ingestion(format!("consumer create: {}", e)))?;

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
        })
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn next_batch(&self) -> Result<Vec<Event>, PipelineError> {
        self.consumer
            .subscribe(&[&self.topic])
            .map_err(|e| PipelineError::Ingestion(format!("subscribe: {}", e)))?;

        let mut events = Vec::new();
        let mut undecodable = 0usize;

        loop {
            match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
                // Timeout: no more messages within the window, batch done.
                Err(_) => break,
                Ok(Err(e)) => {
                    return Err(PipelineError::Ingestion(format!("consumer error: {}", e)))
                }
                Ok(Ok(message)) => {
                    let Some(payload) = message.payload() else {
                        continue;
                    };
                    match serde_json::from_slice::<Event>(payload) {
                        Ok(event) => events.push(event),
                        Err(e) => {
                            undecodable += 1;
                            warn!(error = %e, "failed to decode event payload");
                        }
                    }
                }
            }
        }

        info!(
            received = events.len(),
            undecodable, "event batch collected"
        );
        Ok(events)
    }
}

/// Fixed in-memory source: yields the given events once, then empty
/// batches. Backs tests and offline replays of a snapshot.
pub struct StaticEventSource {
    events: Mutex<Option<Vec<Event>>>,
}

impl StaticEventSource {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(Some(events)),
        }
    }
}

#[async_trait]
impl EventSource for StaticEventSource {
    async fn next_batch(&self) -> Result<Vec<Event>, PipelineError> {
        Ok(self.events.lock().await.take().unwrap_or_default())
    }
}

/// One row of the tabular snapshot: the raw event plus the dense indices
/// derived for this run.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "productId")]
    product_id: String,
    #[serde(rename = "eventType")]
    event_type: String,
    timestamp: i64,
    user_idx: usize,
    product_idx: usize,
}

pub fn snapshot_path(base_dir: &str, prefix: &str) -> PathBuf {
    Path::new(base_dir).join(prefix).join("events.csv")
}

/// Persists a consumed batch for reproducible offline retraining.
/// Events whose identifiers were skipped during the build carry no
/// indices and are omitted.
pub fn write_snapshot(
    base_dir: &str,
    prefix: &str,
    events: &[Event],
    users: &IndexMapping,
    products: &IndexMapping,
) -> Result<PathBuf, PipelineError> {
    let path = snapshot_path(base_dir, prefix);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PipelineError::Data(format!("snapshot dir: {}", e)))?;
    }

    let mut writer = csv::Writer::from_path(&path)
        .map_err(|e| PipelineError::Data(format!("snapshot open: {}", e)))?;
    for event in events {
        let (Some(user_idx), Some(product_idx)) = (
            users.index_of(&event.user_id),
            products.index_of(&event.product_id),
        ) else {
            continue;
        };
        writer
            .serialize(SnapshotRow {
                user_id: event.user_id.clone(),
                product_id: event.product_id.clone(),
                event_type: event.event_type.clone(),
                timestamp: event.timestamp,
                user_idx,
                product_idx,
            })
            .map_err(|e| PipelineError::Data(format!("snapshot write: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| PipelineError::Data(format!("snapshot flush: {}", e)))?;

    info!(path = %path.display(), rows = events.len(), "snapshot written");
    Ok(path)
}

/// Reads a snapshot back as raw events; indices are rebuilt fresh by the
/// matrix builder, never trusted across runs.
pub fn load_snapshot(base_dir: &str, prefix: &str) -> Result<Vec<Event>, PipelineError> {
    let path = snapshot_path(base_dir, prefix);
    let mut reader = csv::Reader::from_path(&path).map_err(|e| {
        PipelineError::Data(format!("snapshot read {}: {}", path.display(), e))
    })?;

    let mut events = Vec::new();
    for row in reader.deserialize::<SnapshotRow>() {
        let row = row.map_err(|e| PipelineError::Data(format!("snapshot row: {}", e)))?;
        events.push(Event {
            user_id: row.user_id,
            product_id: row.product_id,
            event_type: row.event_type,
            timestamp: row.timestamp,
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::matrix;

    fn temp_base() -> String {
        std::env::temp_dir()
            .join(format!("alspipe-test-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned()
    }

    #[tokio::test]
    async fn static_source_yields_once_then_empty() {
        let source = StaticEventSource::new(vec![Event::new("u1", "p1", "view", 1)]);
        assert_eq!(source.next_batch().await.unwrap().len(), 1);
        assert!(source.next_batch().await.unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trips_events_with_indices() {
        let events = vec![
            Event::new("u1", "p1", "view", 10),
            Event::new("u2", "p1", "purchase", 11),
            Event::new("u1", "p2", "view", 12),
        ];
        let data = matrix::build(&events);
        let base = temp_base();

        let path =
            write_snapshot(&base, "2024/run1", &events, &data.users, &data.products).unwrap();
        assert!(path.ends_with("2024/run1/events.csv"));

        let loaded = load_snapshot(&base, "2024/run1").unwrap();
        assert_eq!(loaded, events);

        std::fs::remove_dir_all(&base).ok();
    }

    #[test]
    fn missing_snapshot_is_a_data_error() {
        let err = load_snapshot(&temp_base(), "nope").unwrap_err();
        assert!(matches!(err, PipelineError::Data(_)));
    }
}

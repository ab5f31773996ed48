use crate::error::PipelineError;
use crate::models::TrainingRunRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Experiment-tracking collaborator. One record per training run with
/// hyperparameters, metrics, and the serialized factor artifact.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    async fn log_run(&self, record: &TrainingRunRecord) -> Result<(), PipelineError>;
}

/// Stores run records as JSON under `tracking:run:<run_id>`.
pub struct RedisTrackingBackend {
    client: redis::Client,
}

impl RedisTrackingBackend {
    pub fn new(url: &str) -> Result<Self, PipelineError> {
        let client = redis::Client::open(url)
            .map_err(|e| PipelineError::Config(format!("invalid tracking url: {}", e)))?;
        Ok(Self { client })
    }

    /// Capability probe, run once at startup. Failure is a degradation
    /// signal, not an error path to catch later.
    pub async fn probe(&self) -> bool {
        match self.client.get_async_connection().await {
            Ok(mut conn) => redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl TrackingBackend for RedisTrackingBackend {
    async fn log_run(&self, record: &TrainingRunRecord) -> Result<(), PipelineError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| PipelineError::Data(format!("run record serialization: {}", e)))?;
        let key = format!("tracking:run:{}", record.run_id);
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| PipelineError::CacheWrite {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| PipelineError::CacheWrite {
                key,
                reason: e.to_string(),
            })
    }
}

/// Local-only fallback when the tracking backend is unreachable at
/// startup: metrics go to the log stream and nothing blocks training.
pub struct LogTrackingBackend;

#[async_trait]
impl TrackingBackend for LogTrackingBackend {
    async fn log_run(&self, record: &TrainingRunRecord) -> Result<(), PipelineError> {
        info!(
            run_id = %record.run_id,
            prefix = %record.dataset_prefix,
            rank = record.hyperparameters.rank,
            regularization = record.hyperparameters.regularization as f64,
            iterations = record.hyperparameters.iterations,
            alpha = record.hyperparameters.alpha as f64,
            recall_at_k = record.recall_at_k,
            loss = record.training_loss as f64,
            "training run (local tracking)"
        );
        Ok(())
    }
}

/// Probes the configured backend once and degrades to local-only
/// tracking when it is unavailable.
pub async fn connect(url: &str) -> Arc<dyn TrackingBackend> {
    match RedisTrackingBackend::new(url) {
        Ok(backend) => {
            if backend.probe().await {
                info!(url, "tracking backend available");
                Arc::new(backend)
            } else {
                warn!(url, "tracking backend unreachable, using local-only tracking");
                Arc::new(LogTrackingBackend)
            }
        }
        Err(e) => {
            warn!(error = %e, "tracking backend misconfigured, using local-only tracking");
            Arc::new(LogTrackingBackend)
        }
    }
}

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
    pub tracking: TrackingConfig,
    pub training: TrainingConfig,
    pub publish: PublishConfig,
    pub scheduler: SchedulerConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    /// Bounded per-message poll timeout; expiry ends the batch.
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub rank: usize,
    pub regularization: f32,
    pub iterations: usize,
    pub alpha: f32,
    pub test_per_user: usize,
    pub eval_k: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub top_n: usize,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Base directory for per-prefix event snapshots.
    pub dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kafka: KafkaConfig {
                brokers: "localhost:9092".to_string(),
                topic: "ecommerce-analytics".to_string(),
                group_id: "alspipe_group".to_string(),
                auto_offset_reset: "earliest".to_string(),
                poll_timeout_secs: 5,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                ttl_seconds: 3600,
            },
            tracking: TrackingConfig {
                url: "redis://localhost:6379".to_string(),
            },
            training: TrainingConfig {
                rank: 50,
                regularization: 0.1,
                iterations: 15,
                alpha: 40.0,
                test_per_user: 1,
                eval_k: 10,
                seed: 42,
            },
            publish: PublishConfig {
                top_n: 10,
                key_prefix: "recommendations".to_string(),
            },
            scheduler: SchedulerConfig {
                interval_secs: 1800,
            },
            data: DataConfig {
                dir: "data".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("ALSPIPE"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Startup validation. These are the only errors fatal to the
    /// process; everything else is isolated at cycle or entity level.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.scheduler.interval_secs == 0 {
            return Err(PipelineError::Config(
                "scheduler.interval_secs must be positive".to_string(),
            ));
        }
        if self.publish.top_n == 0 {
            return Err(PipelineError::Config(
                "publish.top_n must be positive".to_string(),
            ));
        }
        if self.training.eval_k == 0 {
            return Err(PipelineError::Config(
                "training.eval_k must be positive".to_string(),
            ));
        }
        if self.kafka.poll_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "kafka.poll_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hyperparameters(&self) -> crate::models::Hyperparameters {
        crate::models::Hyperparameters {
            rank: self.training.rank,
            regularization: self.training.regularization,
            iterations: self.training.iterations,
            alpha: self.training.alpha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_is_a_startup_error() {
        let mut config = Config::default();
        config.scheduler.interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn zero_top_n_is_a_startup_error() {
        let mut config = Config::default();
        config.publish.top_n = 0;
        assert!(config.validate().is_err());
    }
}

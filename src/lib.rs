pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;

pub use config::Config;
pub use error::{PipelineError, Stage};
pub use models::*;

use anyhow::Result;
use std::sync::Arc;

/// Shared collaborators for one process. The cache and tracking clients
/// are injected here once and passed down explicitly, never reached
/// through globals.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub cache: Arc<dyn services::cache::CacheStore>,
    pub tracking: Arc<dyn services::tracking::TrackingBackend>,
}

impl PipelineContext {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let cache: Arc<dyn services::cache::CacheStore> =
            Arc::new(services::cache::RedisCacheStore::new(&config.redis.url)?);

        // Probed once; degrades to local-only tracking when unreachable.
        let tracking = services::tracking::connect(&config.tracking.url).await;

        Ok(Self {
            config,
            cache,
            tracking,
        })
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

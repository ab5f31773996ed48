use thiserror::Error;

/// Stage-level error taxonomy. A `PipelineError` aborts the current cycle
/// only; the scheduler logs it and retries on the next cycle. `Config`
/// errors are the exception: they are raised during startup validation and
/// terminate the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data error: {0}")]
    Data(String),

    #[error("split error: {0}")]
    Split(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("cache write failed for key {key}: {reason}")]
    CacheWrite { key: String, reason: String },

    #[error("ingestion error: {0}")]
    Ingestion(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// The fixed stage sequence of one retraining cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Ingesting,
    Building,
    Splitting,
    Training,
    Evaluating,
    Publishing,
    Sleeping,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Ingesting => "ingesting",
            Stage::Building => "building",
            Stage::Splitting => "splitting",
            Stage::Training => "training",
            Stage::Evaluating => "evaluating",
            Stage::Publishing => "publishing",
            Stage::Sleeping => "sleeping",
        };
        write!(f, "{}", name)
    }
}

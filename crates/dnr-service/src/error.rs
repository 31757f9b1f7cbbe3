use std::path::PathBuf;

/// Error type for the filtering service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Evaluation task is not running")]
    EvaluatorClosed,
    #[error("Lifecycle monitor is not running")]
    MonitorClosed,
    #[error("Service task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Error type for loading a [`ServiceConfig`](crate::ServiceConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

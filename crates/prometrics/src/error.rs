use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric already registered: {0}")]
    AlreadyRegistered(String),
    #[error("invalid histogram buckets: {0}")]
    InvalidBuckets(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

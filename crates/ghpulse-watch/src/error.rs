use ghpulse_queries::QueryError;
use thiserror::Error;

pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("error retrieving repository statistics: {0}")]
    GitHub(String),
    #[error(transparent)]
    Table(#[from] QueryError),
    #[error("error accessing snapshot storage: {0}")]
    Store(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("error marshalling snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WatchError {
    pub fn status(&self) -> u16 {
        match self {
            WatchError::Validation(_) => 400,
            WatchError::Table(inner) => inner.status(),
            _ => 500,
        }
    }
}

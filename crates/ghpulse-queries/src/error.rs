use thiserror::Error;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("error running query: {0}")]
    Execution(String),
    #[error("error accessing table: {0}")]
    Table(String),
    #[error("error accessing query storage: {0}")]
    Store(String),
    #[error("error notifying subscriber: {0}")]
    Notify(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("query {0} does not exist")]
    UnknownQuery(String),
    #[error("error marshalling results: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    /// HTTP-like status for surfacing this error to a caller
    pub fn status(&self) -> u16 {
        match self {
            QueryError::Validation(_) => 400,
            QueryError::UnknownQuery(_) => 404,
            _ => 500,
        }
    }
}

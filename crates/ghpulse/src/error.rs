use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Every way an ingestion, listing or backfill can fail.
///
/// The messages carry the short prefix that is handed back to the caller verbatim.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("error retrieving archive file: {0}")]
    Fetch(String),
    #[error("error unzipping archive file: {0}")]
    Decompress(String),
    #[error("error marshalling report: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("error saving report file: {0}")]
    StoreWrite(String),
    #[error("error reading report file {key}: {reason}")]
    StoreRead { key: String, reason: String },
    #[error("error listing report files: {0}")]
    StoreList(String),
    #[error("error deleting report file {key}: {reason}")]
    StoreDelete { key: String, reason: String },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ArchiveError {
    /// HTTP-like status for surfacing this error to a caller
    pub fn status(&self) -> u16 {
        match self {
            ArchiveError::Validation(_) => 400,
            _ => 500,
        }
    }
}

use crate::models::{Language, ReconciliationResult};
use thiserror::Error;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, DictError>;

/// Enum representing all possible errors in the moddict library.
#[derive(Error, Debug)]
pub enum DictError {
    #[error("Invalid word: value is empty after trimming")]
    InvalidWord,

    #[error("Unsupported upload format: {0}")]
    UnsupportedFormat(String),

    #[error("Dictionary store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Dictionary store rejected the write: {0}")]
    StoreRejected(String),

    #[error("Word entry not found: {0}")]
    NotFound(String),

    #[error("An entry for '{word}' ({language}) already exists")]
    DuplicateIdentity { word: String, language: Language },

    #[error("Page {page} is out of range (only {total_pages} pages)")]
    PageOutOfRange { page: usize, total_pages: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Data directory not found or could not be determined")]
    DataDirNotFound,

    #[error("Internal error: {0}")]
    Internal(String), // For unexpected situations
}

impl DictError {
    /// Whether the error is structural (the store or the runtime failed)
    /// rather than a problem with a single record.
    ///
    /// Fatal errors abort a bulk import; the rest are folded into the
    /// per-record error list.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DictError::InvalidWord
                | DictError::StoreRejected(_)
                | DictError::NotFound(_)
                | DictError::DuplicateIdentity { .. }
        )
    }
}

/// A bulk import that stopped on a fatal error.
///
/// `error` is the failure exactly as the store reported it; `partial`
/// counts only the records processed before it.
#[derive(Error, Debug)]
#[error("Import aborted after {} of the batch's records: {error}", .partial.total)]
pub struct ImportFailure {
    #[source]
    pub error: DictError,
    pub partial: ReconciliationResult,
}

impl From<DictError> for ImportFailure {
    fn from(error: DictError) -> Self {
        ImportFailure {
            error,
            partial: ReconciliationResult::default(),
        }
    }
}

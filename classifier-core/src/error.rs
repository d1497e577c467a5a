//! Error types shared across the classification service.

use thiserror::Error;

/// Errors from the durable catalog / item cache layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StorageError {
    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("durable catalog operation failed: {reason}")]
    CatalogFailed { reason: String },

    #[error("token dictionary lookup failed: {reason}")]
    DictionaryFailed { reason: String },

    #[error("item cache lock poisoned")]
    LockPoisoned,
}

/// Errors from outbound HTTP collaborators (tokenizer, tag document,
/// tag index, result uploader).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("request to {url} failed with status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("could not parse response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("signing failed: {reason}")]
    SigningFailed { reason: String },
}

/// Errors from the classifier pipeline's numeric routines.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("cannot train on an empty pool")]
    EmptyPool,

    #[error("tagger has not been trained")]
    NotTrained,

    #[error("chi-square input out of range: v={v}, x2={x2}")]
    InvalidChiSquareInput { v: i32, x2: f64 },
}

/// Errors from tagger lifecycle and tagger cache checkout.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaggerError {
    #[error("tag not found: {0}")]
    NotFound(String),

    #[error("tag is checked out by another caller: {0}")]
    CheckedOut(String),

    #[error("tag is pending item addition: {0}")]
    PendingItemAddition(String),

    #[error("illegal state transition for tag {tag}: {from:?} -> {attempted}")]
    SequenceError {
        tag: String,
        from: crate::TaggerState,
        attempted: &'static str,
    },

    #[error("tag fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

/// Errors surfaced by the classification engine's job lifecycle.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("no such tag: {0}")]
    NoSuchTag(String),

    #[error("no tags configured for user: {0}")]
    NoTagsForUser(String),

    #[error("unsupported job type: {0}")]
    BadJobType(String),

    #[error("timed out waiting for missing items")]
    MissingItemTimeout,

    #[error("tag checked out, try again later: {0}")]
    CheckedOut(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Tagger(#[from] TaggerError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Result alias used across the classification-service crates.
pub type ClassifierResult<T> = Result<T, ClassifierError>;

/// Master error type aggregating every domain error.
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("tagger error: {0}")]
    Tagger(#[from] TaggerError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

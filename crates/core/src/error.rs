//! Error taxonomy for the retrieval pipeline.
//!
//! Validation problems ([`MonthKeyError`]) are raised before any I/O happens.
//! [`ParseError`] never escapes the pipeline: a page that cannot be decoded
//! turns into an empty, explicitly unavailable collection. [`StoreError`] and
//! [`FetchError`] are propagated untouched; nothing in the core retries.

use thiserror::Error;

/// Rejected `month-YYYY` tokens and year strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonthKeyError {
    /// The token is not shaped like `<month>-<YYYY>`.
    #[error("date format must be month-YYYY (e.g. september-2024), got `{0}`")]
    Format(String),
    /// The month part is neither a full month name nor a known abbreviation.
    #[error("unknown month name `{0}`")]
    UnknownMonth(String),
    /// The year part is not exactly four ASCII digits.
    #[error("year must be a 4-digit number (e.g. 2024), got `{0}`")]
    InvalidYear(String),
}

/// Failures while extracting the embedded offer payload from a page.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No script element carries the payload marker.
    #[error("no script element with an id containing `{marker}`")]
    MissingPayload {
        /// Marker searched for in script ids.
        marker: &'static str,
    },
    /// More than one script element carries the payload marker.
    #[error("{count} script elements have an id containing `{marker}`, expected exactly one")]
    AmbiguousPayload {
        /// Marker searched for in script ids.
        marker: &'static str,
        /// Number of matching elements.
        count: usize,
    },
    /// The script body is not JSON.
    #[error("embedded payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The JSON document lacks the game collection.
    #[error("payload has no game collection at `{0}`")]
    MissingGameData(&'static str),
}

/// Underlying reason for a [`StoreError`].
#[derive(Debug, Error)]
pub enum StoreCause {
    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A document could not be (de)serialised.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Transport or status failure talking to a remote document store.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The backend answered with something other than what the contract promises.
    #[error("{0}")]
    Backend(String),
}

/// Durable store failure, tagged with the attempted operation and path.
#[derive(Debug, Error)]
#[error("store {operation} failed at `{path}`: {cause}")]
pub struct StoreError {
    /// Operation name, e.g. `add` or `read`.
    pub operation: &'static str,
    /// Document path the operation addressed.
    pub path: String,
    /// What went wrong.
    #[source]
    pub cause: StoreCause,
}

impl StoreError {
    /// Wrap a cause with the operation and path it interrupted.
    pub fn new(operation: &'static str, path: impl Into<String>, cause: impl Into<StoreCause>) -> Self {
        Self {
            operation,
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// Convenience for backend-level contract violations.
    pub fn backend(operation: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, path, StoreCause::Backend(message.into()))
    }
}

/// Failure fetching a remote offer page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    /// Request or body read failed, including non-success statuses.
    #[error("request to {url} failed: {source}")]
    Http {
        /// URL that was requested.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// A non-HTTP page source gave up.
    #[error("page source unavailable: {0}")]
    Unavailable(String),
}

/// Everything [`crate::pipeline::RetrievalPipeline`] can fail with.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid month token.
    #[error(transparent)]
    Month(#[from] MonthKeyError),
    /// Remote page could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Structured error type for catalog and descriptor configuration.
/// Every variant here is a configuration bug, not a transient condition,
/// and is fatal for the run that hits it.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvisorError {
    /// A field name was used that the catalog does not know about.
    #[error("unknown field '{field}' referenced by {referrer}")]
    UnknownField { field: String, referrer: String },

    /// A query SQL template could not be rendered.
    #[error("query '{query}' has a malformed SQL template: {reason}")]
    Template { query: String, reason: String },

    /// A dataset definition failed structural validation.
    #[error("dataset '{dataset}' is invalid: {reason}")]
    InvalidDataset { dataset: String, reason: String },
}

/// Result type alias for advisor operations.
pub type AdvisorResult<T> = Result<T, AdvisorError>;

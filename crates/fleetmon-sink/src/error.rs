/// Errors that can occur while writing points to the time-series database.
///
/// # Examples
///
/// ```rust
/// use fleetmon_sink::error::SinkError;
///
/// let err = SinkError::Rejected {
///     status: 400,
///     body: "unable to parse".to_string(),
/// };
/// assert!(err.to_string().contains("400"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Sink configuration is missing a required value or is malformed.
    #[error("Sink: invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP request did not complete.
    #[error("Sink: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The database answered with a non-success status.
    #[error("Sink: write rejected: status={status}, body={body}")]
    Rejected { status: u16, body: String },
}

/// Convenience `Result` alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

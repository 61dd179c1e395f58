use std::time::Duration;

/// Errors raised while collecting metrics from one node's container runtime.
///
/// # Examples
///
/// ```rust
/// use fleetmon_collector::error::CollectError;
///
/// let err = CollectError::MissingApiVersion("http://edge:41022".to_string());
/// assert!(err.to_string().contains("edge:41022"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The runtime could not be reached or rejected the connection.
    #[error("Collect: connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    /// The runtime answered but did not report an API version.
    #[error("Collect: runtime at {0} reported no API version")]
    MissingApiVersion(String),

    /// A bounded remote operation exceeded its deadline.
    #[error("Collect: {operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Listing target containers failed.
    #[error("Collect: list containers failed: {0}")]
    ListContainers(String),

    /// The stats stream failed or produced an undecodable frame.
    #[error("Collect: stats stream for container {container_id} failed: {message}")]
    Stream {
        container_id: String,
        message: String,
    },

    /// The stats stream ended before two samples were read.
    #[error("Collect: stats stream for container {container_id} ended after {received} sample(s)")]
    StreamEnded {
        container_id: String,
        received: usize,
    },

    /// Error surfaced by the Docker Engine client.
    #[error("Collect: docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Convenience `Result` alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectError>;

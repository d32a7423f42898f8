/// Error taxonomy for the aggregator
///
/// Mirrors the error handling design: most errors are per-round and must
/// never crash the process. `Programming` is reserved for bugs caught at
/// the top of a worker loop; everything else is retried, logged, or used
/// to abort a single round.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregatorError {
    /// A network call failed in a way that is worth retrying on the next
    /// loop iteration or timer tick (connection refused, timeout, 5xx).
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// A message or response body could not be parsed. The caller should
    /// log and drop it, never propagate it upward.
    #[error("parse error: {0}")]
    ParseError(String),

    /// An upstream call succeeded but returned no usable data (e.g. no
    /// contribution metadata). Callers fall back to documented defaults.
    #[error("upstream missing data: {0}")]
    UpstreamMissingData(String),

    /// The current round cannot proceed (every model download failed,
    /// shape mismatch, empty accepted set with no submissions). Abort the
    /// round, leave the ledger as-is.
    #[error("round fatal: {0}")]
    RoundFatal(String),

    /// An invariant was violated by our own code, not by an external
    /// system. Logged with as much context as possible.
    #[error("programming error: {0}")]
    Programming(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

impl From<reqwest::Error> for AggregatorError {
    fn from(err: reqwest::Error) -> Self {
        AggregatorError::TransientNetwork(err.to_string())
    }
}

impl From<serde_json::Error> for AggregatorError {
    fn from(err: serde_json::Error) -> Self {
        AggregatorError::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for AggregatorError {
    fn from(err: std::io::Error) -> Self {
        AggregatorError::RoundFatal(err.to_string())
    }
}

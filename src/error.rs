//! Error types for the query compiler and response parser

/// Errors raised while compiling query targets or decoding a batch response.
///
/// Failure handling is deliberately two-tier: compile and decode errors abort
/// the whole batch (a partially-built multi-search request is not meaningful to
/// send, and an undecodable envelope leaves nothing to work with), while an
/// error reported by the backend for an individual response is *not* an
/// [`Error`] — it is recorded against that target's result slot so sibling
/// targets still produce series.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid query for target {ref_id}: {reason}")]
    InvalidQuery { ref_id: String, reason: String },

    #[error("invalid setting `{key}` for target {ref_id}: {reason}")]
    InvalidSetting {
        ref_id: String,
        key: String,
        reason: String,
    },

    #[error("invalid target body: {0}")]
    InvalidTarget(#[from] serde_json::Error),

    #[error("invalid multi-search response: {0}")]
    InvalidResponse(String),

    #[error("response count {responses} does not match target count {targets}")]
    ResponseCountMismatch { responses: usize, targets: usize },
}

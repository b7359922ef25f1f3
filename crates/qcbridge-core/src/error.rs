//! Harness-level error taxonomy.
//!
//! Resolution-time failures (`EngineNotFound`, `UnsupportedVersion`,
//! `UntaggedBuild`) are raised before any execution attempt. Execution
//! failures are classified into `Resource` / `Random` / `Input` / `Unknown`
//! by [`crate::classify`]; only `Random` is worth retrying in place.

use thiserror::Error;

/// Errors produced by the QCBridge harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// No subprocess-invocable or importable engine installation was found,
    /// or a resolution probe failed or timed out.
    #[error("engine not found: {0}")]
    EngineNotFound(String),

    /// The resolved engine version predates the minimum supported release.
    #[error("engine version '{0}' not understood")]
    UnsupportedVersion(String),

    /// The resolved version text carries the untagged development marker;
    /// the build is unidentifiable and cannot be matched to a protocol.
    #[error("engine build '{0}' has no version tags; pull tags and rebuild")]
    UntaggedBuild(String),

    /// The engine could not access its own scratch storage. Retrying with
    /// the same scratch root will not help.
    #[error("resource error: {0}")]
    Resource(String),

    /// Transient storage fault or fatal signal; retrying is reasonable.
    #[error("random error: {0}")]
    Random(String),

    /// The request itself is invalid for this engine; it must change
    /// before another attempt.
    #[error("input error: {0}")]
    Input(String),

    /// Unrecognized engine failure, surfaced as-is for caller inspection.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// Staging or output-collection I/O failure inside the harness.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure on the canonical schema.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine's binary output frame could not be decoded.
    #[error("wire decode error: {0}")]
    WireDecode(String),
}

impl HarnessError {
    /// Whether the caller's retry policy should consider re-running the
    /// same request in place. Only transient faults qualify.
    pub fn retryable(&self) -> bool {
        matches!(self, HarnessError::Random(_))
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::EngineNotFound("psi4 missing from PATH".to_string());
        assert!(err.to_string().contains("engine not found"));

        let err = HarnessError::UnsupportedVersion("1.1".to_string());
        assert!(err.to_string().contains("'1.1'"));

        let err = HarnessError::UntaggedBuild("undef".to_string());
        assert!(err.to_string().contains("no version tags"));
    }

    #[test]
    fn test_only_random_is_retryable() {
        assert!(HarnessError::Random("PSIO Error: flaky disk".into()).retryable());
        assert!(!HarnessError::Resource("scratch gone".into()).retryable());
        assert!(!HarnessError::Input("bad reference".into()).retryable());
        assert!(!HarnessError::Unknown("???".into()).retryable());
        assert!(!HarnessError::EngineNotFound("nope".into()).retryable());
        assert!(!HarnessError::UnsupportedVersion("1.1".into()).retryable());
    }
}

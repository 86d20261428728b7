use paperscout_common::PaperscoutError;
use thiserror::Error;

/// Internal failures of the discovery pipeline. None of these abort a round;
/// they only degrade what the round produces.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("source `{source_name}` unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("relevance validation failed: {0}")]
    ValidationFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),
}

/// Recoverable error reported by a single source adapter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("request blocked: {0}")]
    Blocked(String),

    /// An error the provider reported inside a successful response.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("timeout")]
    Timeout,
}

impl SourceError {
    /// Short reason string recorded in `FailedSource`.
    pub fn reason(&self) -> String {
        match self {
            SourceError::Timeout => "timeout".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Parse(e.to_string())
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

impl From<PaperscoutError> for SourceError {
    fn from(e: PaperscoutError) -> Self {
        match e {
            PaperscoutError::SecurityError(msg) => SourceError::Blocked(msg),
            PaperscoutError::Http(e) => SourceError::from(e),
            PaperscoutError::Serialization(e) => SourceError::from(e),
            PaperscoutError::Xml(msg) => SourceError::Parse(msg),
            other => SourceError::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_reason_is_stable() {
        assert_eq!(SourceError::Timeout.reason(), "timeout");
        assert_eq!(
            SourceError::Status { status: 503, body: "down".into() }.reason(),
            "HTTP 503: down"
        );
    }

    #[test]
    fn test_security_error_maps_to_blocked() {
        let e: SourceError = PaperscoutError::SecurityError("evil.com".into()).into();
        assert!(matches!(e, SourceError::Blocked(_)));
    }
}

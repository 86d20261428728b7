use paperscout_common::ApiError;
use thiserror::Error;

use crate::session::SessionId;

/// The only errors a session operation reports to its caller. A rejected
/// operation leaves the session exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid filters: {0}")]
    InvalidFilters(String),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

/// Raised by a keyword summarizer; never leaves the augmenter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("augmentation failed: {0}")]
pub struct AugmentationFailed(pub String);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidState(_) => ApiError::conflict(e.to_string()),
            SessionError::InvalidFilters(_) => ApiError::unprocessable(e.to_string()),
            SessionError::UnknownSession(_) => ApiError::not_found(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let busy: ApiError = SessionError::InvalidState("round in flight".into()).into();
        assert_eq!(busy.status.as_u16(), 409);
        let filters: ApiError = SessionError::InvalidFilters("year_to < year_from".into()).into();
        assert_eq!(filters.status.as_u16(), 422);
        let missing: ApiError = SessionError::UnknownSession(Uuid::nil()).into();
        assert_eq!(missing.status.as_u16(), 404);
    }
}

//! Venue error classification.
//!
//! The coordinator cares about the class of a failure, not its venue:
//! transient errors are retried with backoff, auth failures shut the venue
//! down, everything else reduces to a leg-state transition.

use thiserror::Error;

/// Classified venue error.
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// Network timeout, 5xx, rate limit. Safe to retry with backoff.
    #[error("transient venue error: {0}")]
    Transient(String),
    /// Credential rejection. Fatal for the venue adapter.
    #[error("venue authentication failed: {0}")]
    Auth(String),
    /// The venue understood and refused the request (bad order, insufficient
    /// balance). Not retryable.
    #[error("venue rejected request: {0}")]
    Rejected(String),
    /// Response did not match the expected shape.
    #[error("malformed venue response: {0}")]
    Parse(String),
    /// Request-side failure before a signed payload reached the venue.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl VenueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, VenueError::Auth(_))
    }

    /// Classify an HTTP response status.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 401 || status.as_u16() == 403 {
            VenueError::Auth(format!("{status}: {body}"))
        } else if status.as_u16() == 429 || status.is_server_error() {
            VenueError::Transient(format!("{status}: {body}"))
        } else {
            VenueError::Rejected(format!("{status}: {body}"))
        }
    }

    /// Classify a transport-level failure.
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            VenueError::Transient(err.to_string())
        } else {
            VenueError::Rejected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert!(VenueError::from_status(StatusCode::UNAUTHORIZED, String::new()).is_auth());
        assert!(VenueError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(VenueError::from_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(matches!(
            VenueError::from_status(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            VenueError::Rejected(_)
        ));
    }
}

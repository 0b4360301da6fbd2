use thiserror::Error;

/// A scope name that is not one of `mine`, `unassigned`, `all`.
///
/// Programmer error: never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized scope: {0:?}")]
pub struct ScopeError(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Credential absent, expired or rejected by the server. Fatal to the session.
    #[error("auth error: {0}")]
    Auth(String),

    /// Transport failure; the session reconnects with backoff.
    #[error("connect error: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChannelError::Auth(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("auth error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Rejected before any request went out.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
            FetchError::Auth(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(!FetchError::Auth("401".into()).is_retryable());
        assert!(!FetchError::Scope(ScopeError("x".into())).is_retryable());
        assert!(!FetchError::Malformed("eof".into()).is_retryable());
        assert!(!FetchError::InvalidRequest("page 0".into()).is_retryable());

        assert!(ChannelError::Connect("refused".into()).is_retryable());
        assert!(!ChannelError::Auth("rejected".into()).is_retryable());
    }

    #[test]
    fn serde_errors_map_to_malformed() {
        let err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        assert!(matches!(FetchError::from(err), FetchError::Malformed(_)));
    }

    #[test]
    fn scope_error_display() {
        let err = FetchError::from(ScopeError("team".into()));
        assert_eq!(err.to_string(), "unrecognized scope: \"team\"");
    }
}

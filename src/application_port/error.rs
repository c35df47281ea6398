use crate::domain_port::{StoreError, TransportError};

/// Everything a caller of the client can see go wrong.
///
/// `Clone` because one refresh outcome is handed to every request that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("authorization expired")]
    AuthorizationExpired,
    #[error("session refresh failed: {0}")]
    RefreshFailed(String),
    #[error("mutation failed: {0}")]
    MutationFailed(Box<ApiError>),
    #[error("server responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("credential store error: {0}")]
    Store(String),
}

impl ApiError {
    /// Unwraps `MutationFailed` down to the error that made the write fail.
    pub fn root(&self) -> &ApiError {
        match self {
            ApiError::MutationFailed(inner) => inner.root(),
            other => other,
        }
    }

    pub fn ends_session(&self) -> bool {
        matches!(
            self.root(),
            ApiError::RefreshFailed(_) | ApiError::Unauthenticated
        )
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        ApiError::Transport(error.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        ApiError::Store(error.to_string())
    }
}

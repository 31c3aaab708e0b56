use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Session invalid. Not recoverable locally; the surrounding shell
    /// redirects to login.
    #[error("authentication required")]
    AuthRequired,
    /// Network or broker failure. Retried only at user-initiated granularity
    /// (scroll again, re-send).
    #[error("transport failure: {0}")]
    Transport(String),
    /// Unexpected response shape, e.g. an HTML login page where JSON was
    /// expected. Treated like an invalid session.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The server declined a send; the optimistic entry has been removed.
    #[error("send rejected: {message}")]
    SendRejected { message: String },
    /// Realtime subscription attempted before identity resolution finished.
    #[error("local identity is not resolved yet")]
    IdentityRequired,
}

impl SyncError {
    /// Auth-level and shape-level failures both mean the session is
    /// unusable; callers redirect instead of retrying.
    pub fn is_auth_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthRequired | SyncError::MalformedResponse(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return SyncError::AuthRequired;
            }
        }
        if err.is_decode() {
            return SyncError::MalformedResponse(err.to_string());
        }
        SyncError::Transport(err.to_string())
    }
}

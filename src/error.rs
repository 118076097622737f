use thiserror::Error;

/// Failures that abort the current outer cycle and send the loop into
/// backoff. Per-entry parse problems and missing confirmation fields are
/// handled locally (skip / placeholder) and never reach this type.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Endpoint unreachable, or a fetch/submit came back with a
    /// non-success HTTP status.
    #[error("transport failure during {action}: {detail}")]
    Transport {
        action: &'static str,
        detail: String,
    },

    /// Login page lacked the anti-forgery field, or the portal rejected
    /// the submitted credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A claim was attempted with a page token and a candidate taken from
    /// different listings fetches. Tokens are single-fetch values.
    #[error("claim token and candidate come from different listings fetches")]
    StaleToken,
}

impl WatchError {
    pub fn transport(action: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            action,
            detail: err.to_string(),
        }
    }

    pub fn status(action: &'static str, status: reqwest::StatusCode) -> Self {
        Self::Transport {
            action,
            detail: format!("unexpected status {status}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;

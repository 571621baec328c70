use thiserror::Error;

/// Failure talking to the scheduler. Non-2xx and malformed payloads are
/// treated the same way by callers: the call failed.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request to `{0}` timed out")]
    Timeout(String),
    #[error("transport error calling `{path}`")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("scheduler answered `{path}` with status {status}")]
    Status { path: String, status: u16 },
    #[error("malformed payload from `{path}`: {reason}")]
    Malformed { path: String, reason: String },
}

impl ApiError {
    pub(crate) fn from_reqwest(path: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(path.to_string())
        } else if e.is_decode() {
            ApiError::Malformed {
                path: path.to_string(),
                reason: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            }
        } else {
            ApiError::Transport {
                path: path.to_string(),
                source: e,
            }
        }
    }

    /// Only connection level failures are worth a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Timeout(_) | ApiError::Transport { .. })
    }
}

/// Errors surfaced by the timeline engine, search and export subsystems.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Transient transport failure; the user retries by re-triggering the action
    #[error("Network error: {0}")]
    Network(String),

    /// Rejected locally before any request was sent
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Search index not ready yet; callers poll through this state
    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),

    /// Export job reached the `error` terminal state
    #[error("Export {export_id} failed: {message}")]
    JobFailed { export_id: String, message: String },

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    /// Whether re-triggering the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Network(_) => true,
            CoreError::Backend { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CoreError::Decode(err.to_string())
        } else {
            CoreError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(CoreError::Network("reset".into()).is_retryable());
        assert!(CoreError::Backend { status: 503, message: "busy".into() }.is_retryable());
        assert!(!CoreError::Backend { status: 404, message: "gone".into() }.is_retryable());
        assert!(!CoreError::validation("bad range").is_retryable());
    }

    #[test]
    fn test_job_failed_message() {
        let err = CoreError::JobFailed {
            export_id: "exp-1".into(),
            message: "disk full".into(),
        };
        assert_eq!(err.to_string(), "Export exp-1 failed: disk full");
    }
}

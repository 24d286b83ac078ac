use thiserror::Error;

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed record '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("write conflict on record '{key}'")]
    Conflict { key: String },

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("invalid run id '{0}': must be 1-128 characters of [A-Za-z0-9._-]")]
    InvalidRunId(String),

    #[error("invalid phase name '{0}': must be non-empty and at most 128 characters")]
    InvalidPhaseName(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BeaconError {
    /// Errors worth another read-merge-write attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BeaconError::StoreUnavailable(_) | BeaconError::Conflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BeaconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BeaconError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(BeaconError::Conflict { key: "run".into() }.is_retryable());
        assert!(!BeaconError::NotFound("run".into()).is_retryable());
        assert!(!BeaconError::PublishFailed("channel_not_found".into()).is_retryable());
    }
}

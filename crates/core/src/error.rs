use thiserror::Error;

pub type DecisionResult<T> = Result<T, DecisionError>;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Infeasible constraints: {0}")]
    InfeasibleConstraint(String),

    #[error("Journey {0} did not convert")]
    NotConverted(String),

    #[error("Invalid journey: {0}")]
    InvalidJourney(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Journey store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Stable classification of a [`DecisionError`], used by callers that map
/// failures onto their own responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InsufficientData,
    InfeasibleConstraint,
    NotConverted,
    InvalidJourney,
    Infrastructure,
}

impl DecisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::InsufficientData(_) => ErrorKind::InsufficientData,
            Self::InfeasibleConstraint(_) => ErrorKind::InfeasibleConstraint,
            Self::NotConverted(_) => ErrorKind::NotConverted,
            Self::InvalidJourney(_) => ErrorKind::InvalidJourney,
            Self::Store(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Whether retrying the same request later can succeed without the
    /// caller changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientData(_) | Self::Store(_) | Self::Io(_)
        )
    }
}

impl From<config::ConfigError> for DecisionError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_retry_classification() {
        let err = DecisionError::InsufficientData("only 3 converted journeys".into());
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        assert!(err.is_retryable());

        let err = DecisionError::InfeasibleConstraint("minimums exceed total".into());
        assert_eq!(err.kind(), ErrorKind::InfeasibleConstraint);
        assert!(!err.is_retryable());

        let err = DecisionError::NotConverted("j-1".into());
        assert_eq!(err.to_string(), "Journey j-1 did not convert");
    }
}

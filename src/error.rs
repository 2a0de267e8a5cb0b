use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy of one import attempt.
///
/// The variant decides whether the retry supervisor tries again: a missing
/// file or an unparseable sheet will not fix itself, while store hiccups,
/// failed batch writes and timeouts might.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file does not exist: {file_ref}")]
    NotFound { file_ref: String },

    #[error("failed to parse {file_name}: {message}")]
    Parse { file_name: String, message: String },

    #[error("failed to upsert batch {batch} of {file_name}: {source}")]
    Upsert {
        file_name: String,
        batch: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("status store unavailable: {0}")]
    Store(#[source] anyhow::Error),

    #[error("import attempt timed out after {limit:?}")]
    Timeout { limit: Duration },
}

impl ImportError {
    pub fn parse(file_name: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            file_name: file_name.to_string(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upsert { .. } | Self::Store(_) | Self::Timeout { .. }
        )
    }

    /// Short machine-readable tag used in logs and the queue's `last_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Parse { .. } => "parse",
            Self::Upsert { .. } => "upsert",
            Self::Store(_) => "store",
            Self::Timeout { .. } => "timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(!ImportError::NotFound {
            file_ref: "uploads/a.csv".into()
        }
        .is_retryable());
        assert!(!ImportError::parse("a.csv", "missing column unique_key").is_retryable());
        assert!(ImportError::Store(anyhow::anyhow!("connection reset")).is_retryable());
        assert!(ImportError::Timeout {
            limit: Duration::from_secs(300)
        }
        .is_retryable());
        assert!(ImportError::Upsert {
            file_name: "a.csv".into(),
            batch: 2,
            source: anyhow::anyhow!("deadlock detected"),
        }
        .is_retryable());
    }

    #[test]
    fn messages_are_human_readable() {
        let err = ImportError::NotFound {
            file_ref: "uploads/missing.csv".into(),
        };
        assert_eq!(err.to_string(), "file does not exist: uploads/missing.csv");
        assert_eq!(err.kind(), "not_found");

        let err = ImportError::Upsert {
            file_name: "a.csv".into(),
            batch: 3,
            source: anyhow::anyhow!("duplicate key"),
        };
        assert_eq!(
            err.to_string(),
            "failed to upsert batch 3 of a.csv: duplicate key"
        );
    }
}

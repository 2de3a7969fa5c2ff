//! Errors - エラー型と分類
//!
//! No error in the core terminates the process; every variant is returned to
//! the calling layer, which decides how to present it.

use serde::{Deserialize, Serialize};

use super::ids::RecordId;
use crate::ports::StoreError;

/// ErrorKind は運用上の分類
///
/// - Validation: 入力の問題（コマンドは副作用なしで拒否された）
/// - Feedback: フィードバック付与の問題（レコード・学習状態は不変）
/// - Persistence: 永続化の問題（操作は成功扱いにしない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Feedback,
    Persistence,
}

#[derive(Debug, thiserror::Error)]
pub enum HomeError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid operation `{operation}` for {target}: {reason}")]
    InvalidOperation {
        target: String,
        operation: String,
        reason: String,
    },

    #[error("invalid argument `{parameter}`: {reason}")]
    InvalidArgument { parameter: String, reason: String },

    #[error("interaction record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("feedback window expired for {record_id}: recorded {age_secs}s ago, window is {window_secs}s")]
    FeedbackWindowExpired {
        record_id: RecordId,
        age_secs: i64,
        window_secs: i64,
    },

    #[error("feedback already attached to {0}")]
    FeedbackAlreadyAttached(RecordId),

    #[error("failed to persist {store} after {attempts} attempt(s): {source}")]
    PersistenceWriteFailure {
        store: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("persisted {store} is unreadable, starting from an empty state: {source}")]
    PersistenceReadCorruption {
        store: &'static str,
        #[source]
        source: StoreError,
    },
}

impl HomeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HomeError::DeviceNotFound(_)
            | HomeError::InvalidOperation { .. }
            | HomeError::InvalidArgument { .. } => ErrorKind::Validation,
            HomeError::RecordNotFound(_)
            | HomeError::FeedbackWindowExpired { .. }
            | HomeError::FeedbackAlreadyAttached(_) => ErrorKind::Feedback,
            HomeError::PersistenceWriteFailure { .. }
            | HomeError::PersistenceReadCorruption { .. } => ErrorKind::Persistence,
        }
    }

    pub fn invalid_argument(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        HomeError::InvalidArgument {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

impl From<crate::domain::capability::ArgumentError> for HomeError {
    fn from(err: crate::domain::capability::ArgumentError) -> Self {
        HomeError::InvalidArgument {
            parameter: err.parameter,
            reason: err.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn kinds_follow_taxonomy() {
        let id = RecordId::from_ulid(Ulid::new());
        assert_eq!(HomeError::DeviceNotFound("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(HomeError::invalid_argument("level", "bad").kind(), ErrorKind::Validation);
        assert_eq!(HomeError::RecordNotFound(id).kind(), ErrorKind::Feedback);
        assert_eq!(HomeError::FeedbackAlreadyAttached(id).kind(), ErrorKind::Feedback);
        assert_eq!(
            HomeError::PersistenceWriteFailure {
                store: "device snapshot",
                attempts: 3,
                source: StoreError::Unavailable("disk full".into()),
            }
            .kind(),
            ErrorKind::Persistence
        );
    }

    #[test]
    fn write_failure_message_names_store_and_attempts() {
        let err = HomeError::PersistenceWriteFailure {
            store: "interaction log",
            attempts: 3,
            source: StoreError::Unavailable("disk full".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("interaction log"));
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("disk full"));
    }
}

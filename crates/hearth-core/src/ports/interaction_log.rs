//! InteractionLog port - 追記専用ログ
//!
//! The log is the chronological source of truth for interactions. Records are
//! never rewritten: attaching feedback appends a second event that refers to
//! the record by id, and loading folds the events back together.

use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::domain::{Feedback, InteractionRecord, RecordId};

/// ログの 1 行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    Recorded {
        record: InteractionRecord,
    },
    FeedbackAttached {
        record_id: RecordId,
        feedback: Feedback,
    },
}

/// InteractionLog は LogEvent を順序どおりに保存する
pub trait InteractionLog: Send + Sync {
    /// 1 イベントを末尾に追記する。成功した時点で永続化済み
    fn append(&self, event: &LogEvent) -> Result<(), StoreError>;

    /// 追記順に全イベントを返す
    ///
    /// 書きかけの末尾行は捨てて `Ok` を返す。それ以外の破損は `StoreError::Corrupt`。
    fn load(&self) -> Result<Vec<LogEvent>, StoreError>;

    /// 壊れたログを退避し、空のログから再開する
    fn quarantine(&self) -> Result<Option<String>, StoreError>;

    /// 全イベントを削除する（reset 用）
    fn clear(&self) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

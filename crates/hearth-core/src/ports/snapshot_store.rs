//! SnapshotStore port - 丸ごと書き換えるストア
//!
//! Device state and the preference table are small enough to be written as a
//! whole on every change. A save either replaces the previous snapshot
//! completely or leaves it untouched.

use std::path::PathBuf;

/// StoreError はストレージアダプタが返すエラー
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt data at {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(location: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

/// SnapshotStore は値全体を保存・読込する
///
/// # Thread Safety
/// - `Send + Sync` を要求（コンポーネントを tokio タスク間で共有するため）
pub trait SnapshotStore<T>: Send + Sync {
    /// `Ok(None)` は「まだ何も保存されていない」
    fn load(&self) -> Result<Option<T>, StoreError>;

    /// 全体を置き換える（部分書き込みは見えない）
    fn save(&self, value: &T) -> Result<(), StoreError>;

    /// 壊れたデータを退避し、以降の load を空にする
    ///
    /// 退避先があればその場所を返します。
    fn quarantine(&self) -> Result<Option<String>, StoreError>;

    /// ログ用の表示名（ファイルパスなど）
    fn describe(&self) -> String;
}

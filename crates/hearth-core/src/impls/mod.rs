//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **JsonFileStore**: スナップショットを JSON ファイルに保存（temp + rename）
//! - **JsonlInteractionLog**: インタラクションログを JSON Lines で追記
//! - **MemorySnapshotStore / MemoryInteractionLog**: 開発用・テスト用

pub mod json_file;
pub mod jsonl_log;
pub mod memory;

// 主要な型を再エクスポート
pub use self::json_file::JsonFileStore;
pub use self::jsonl_log::JsonlInteractionLog;
pub use self::memory::{MemoryInteractionLog, MemorySnapshotStore};

//! Ports - 抽象化レイヤー
//!
//! 外部（時刻・ID 採番・ディスク）へのインターフェースを trait として定義し、
//! 実装の詳細を `impls` に隠蔽します。
//!
//! # 永続化の三つのストア
//! - デバイススナップショット（`SnapshotStore<DeviceSnapshot>`）
//! - 学習テーブル（`SnapshotStore<PreferenceTable>`）
//! - インタラクションログ（`InteractionLog`、追記専用）
//!
//! 三つは独立に復旧可能で、どれか一つが壊れていても他は保持されます。

pub mod clock;
pub mod id_generator;
pub mod interaction_log;
pub mod snapshot_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::interaction_log::{InteractionLog, LogEvent};
pub use self::snapshot_store::{SnapshotStore, StoreError};

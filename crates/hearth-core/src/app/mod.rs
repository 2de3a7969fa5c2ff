//! App - アプリケーション層
//!
//! registry / preference / recorder を組み合わせて、コマンド実行と
//! フィードバック学習の一連の流れを実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: 構築とワイヤリング（設定検証・ストア読み込み・学習テーブルの整合）
//! - **CommandDispatcher**: コマンド実行（plan→override→apply→record）とフィードバック付与
//! - **status**: 統計と学習サマリ

pub mod builder;
pub mod dispatcher;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, EngineBuilder};
pub use self::dispatcher::CommandDispatcher;
pub use self::status::{EngineStats, PreferenceSummary, RecordCounts};

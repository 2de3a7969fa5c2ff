//! hearth-core
//!
//! Core building blocks for the Hearth home-control engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, device, capability, context, command, interaction, outcome, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, SnapshotStore, InteractionLog）
//! - **impls**: ports の実装（JSON ファイル、JSON Lines ログ、インメモリ）
//! - **registry**: デバイス状態の正本（DeviceRegistry）
//! - **preference**: 文脈ごとの学習値（PreferenceStore, LearningPolicy）
//! - **recorder**: インタラクション記録とフィードバック（FeedbackRecorder）
//! - **app**: アプリケーションロジック（EngineBuilder, CommandDispatcher, status）
//! - **config**: 設定（HomeConfig）
//! - **retry**: 永続化書き込みのリトライ

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod preference;
pub mod recorder;
pub mod registry;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

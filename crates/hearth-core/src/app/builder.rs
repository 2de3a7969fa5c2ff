//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # 起動時の流れ
//! 1. 設定の検証（Fail-fast）
//! 2. 三つのストアをそれぞれ読み込む（壊れていたら退避して空から開始）
//! 3. 学習テーブルがログと食い違っていれば、ログから作り直す
//!    （ログ自体を読めなかった場合は作り直さず、テーブルを残す）

use std::sync::Arc;

use tracing::{info, warn};

use super::CommandDispatcher;
use crate::config::{ConfigError, HomeConfig};
use crate::impls::{JsonFileStore, JsonlInteractionLog, MemoryInteractionLog, MemorySnapshotStore};
use crate::ports::{Clock, IdGenerator, InteractionLog, SnapshotStore, SystemClock, UlidGenerator};
use crate::preference::{PreferenceStore, PreferenceTable};
use crate::recorder::FeedbackRecorder;
use crate::registry::{DeviceRegistry, DeviceSnapshot};

/// EngineBuilder は CommandDispatcher を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .expect_devices(&["living_room_light", "thermostat"])
///     .build()
///     .await?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定を検証
/// - expect_devices() で指定した ID がカタログに無ければ BuildError
pub struct EngineBuilder {
    config: HomeConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    device_store: Option<Box<dyn SnapshotStore<DeviceSnapshot>>>,
    preference_store: Option<Box<dyn SnapshotStore<PreferenceTable>>>,
    log: Option<Box<dyn InteractionLog>>,
    expected_devices: Option<Vec<String>>,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Missing devices: {0:?}. These devices were expected but are not in the catalog.")]
    MissingDevices(Vec<String>),

    #[error("the device catalog is empty")]
    EmptyCatalog,
}

impl EngineBuilder {
    /// File-backed stores under `config.data_dir`.
    pub fn new(config: HomeConfig) -> Self {
        Self {
            config,
            clock: None,
            ids: None,
            device_store: None,
            preference_store: None,
            log: None,
            expected_devices: None,
        }
    }

    /// In-memory stores; nothing touches the disk.
    pub fn in_memory(config: HomeConfig) -> Self {
        Self::new(config)
            .with_device_store(Box::new(MemorySnapshotStore::<DeviceSnapshot>::new()))
            .with_preference_store(Box::new(MemorySnapshotStore::<PreferenceTable>::new()))
            .with_interaction_log(Box::new(MemoryInteractionLog::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_device_store(mut self, store: Box<dyn SnapshotStore<DeviceSnapshot>>) -> Self {
        self.device_store = Some(store);
        self
    }

    pub fn with_preference_store(mut self, store: Box<dyn SnapshotStore<PreferenceTable>>) -> Self {
        self.preference_store = Some(store);
        self
    }

    pub fn with_interaction_log(mut self, log: Box<dyn InteractionLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// 期待されるデバイス ID のリストを設定
    pub fn expect_devices(mut self, ids: &[&str]) -> Self {
        self.expected_devices = Some(ids.iter().map(|id| id.to_string()).collect());
        self
    }

    /// 検証してから三つのストアを読み込み、CommandDispatcher を返す
    ///
    /// 壊れたストアの復旧は失敗扱いにしません（`CommandDispatcher::recovered` に残ります）。
    pub async fn build(self) -> Result<CommandDispatcher, BuildError> {
        self.config.validate()?;
        if self.config.devices.is_empty() {
            return Err(BuildError::EmptyCatalog);
        }
        if let Some(expected) = &self.expected_devices {
            let missing: Vec<String> = expected
                .iter()
                .filter(|id| !self.config.devices.iter().any(|d| d.id.as_str() == id.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingDevices(missing));
            }
        }

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let device_store = self
            .device_store
            .unwrap_or_else(|| Box::new(JsonFileStore::<DeviceSnapshot>::new(config.devices_path())));
        let preference_store = self
            .preference_store
            .unwrap_or_else(|| Box::new(JsonFileStore::<PreferenceTable>::new(config.preferences_path())));
        let log = self
            .log
            .unwrap_or_else(|| Box::new(JsonlInteractionLog::new(config.log_path())));

        let mut recovered = Vec::new();

        let (registry, err) = DeviceRegistry::load(
            &config.devices,
            device_store,
            config.retry.clone(),
            Arc::clone(&clock),
        );
        recovered.extend(err);

        let (mut preferences, err) =
            PreferenceStore::load(config.learning.clone(), preference_store, config.retry.clone());
        recovered.extend(err);

        let (recorder, err) = FeedbackRecorder::load(
            log,
            ids,
            Arc::clone(&clock),
            config.feedback_window(),
            config.retry.clone(),
        );
        let log_lost = err.is_some();
        recovered.extend(err);

        if preferences.feedback_applied() != recorder.feedback_count() {
            if log_lost {
                // nothing to replay; keep what was learned and count from here
                warn!(
                    table = preferences.feedback_applied(),
                    log = recorder.feedback_count(),
                    "interaction log was unreadable, keeping the preference table"
                );
                preferences.adopt_watermark(recorder.feedback_count());
                if let Err(err) = preferences.flush().await {
                    warn!(error = %err, "preference watermark could not be persisted");
                    recovered.push(err);
                }
            } else {
                warn!(
                    table = preferences.feedback_applied(),
                    log = recorder.feedback_count(),
                    "preference table is out of date with the interaction log, rebuilding"
                );
                if let Err(err) = preferences.rebuild(recorder.learning_history()).await {
                    warn!(error = %err, "rebuilt preferences could not be persisted");
                    recovered.push(err);
                }
            }
        }

        info!(
            devices = registry.devices().len(),
            records = recorder.len(),
            preferences = preferences.len(),
            recovered = recovered.len(),
            "engine ready"
        );
        Ok(CommandDispatcher::new(
            registry,
            preferences,
            recorder,
            config.utc_offset(),
            clock,
            recovered,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedbackSignal, HomeError, ResolvedCommand};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn dim_command() -> ResolvedCommand {
        ResolvedCommand::new(
            "set_brightness",
            serde_json::from_value(json!({"device_id": "bedroom_light", "level": 40})).unwrap(),
            "too bright, dim it",
            Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_build_success() {
        let engine = EngineBuilder::in_memory(HomeConfig::default())
            .expect_devices(&["living_room_light", "thermostat"])
            .build()
            .await;
        assert!(engine.is_ok());
    }

    #[tokio::test]
    async fn test_build_missing_devices() {
        let engine = EngineBuilder::in_memory(HomeConfig::default())
            .expect_devices(&["thermostat", "garage_door"])
            .build()
            .await;
        assert!(matches!(
            engine,
            Err(BuildError::MissingDevices(missing)) if missing == vec!["garage_door".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = HomeConfig::default();
        config.learning.alpha = 0.0;
        assert!(matches!(
            EngineBuilder::in_memory(config).build().await,
            Err(BuildError::Config(_))
        ));

        let empty = HomeConfig {
            devices: Vec::new(),
            ..HomeConfig::default()
        };
        assert!(matches!(
            EngineBuilder::in_memory(empty).build().await,
            Err(BuildError::EmptyCatalog)
        ));
    }

    #[tokio::test]
    async fn stale_preference_table_is_rebuilt_from_log() {
        let dir = TempDir::new().unwrap();
        let config = HomeConfig::default().with_data_dir(dir.path());

        let summary = {
            let engine = EngineBuilder::new(config.clone()).build().await.unwrap();
            for _ in 0..2 {
                let result = engine.dispatch(dim_command()).await.unwrap();
                engine
                    .attach_feedback(&result.record_id, FeedbackSignal::Positive, None)
                    .await
                    .unwrap();
            }
            engine.summary(10).await
        };

        std::fs::remove_file(config.preferences_path()).unwrap();

        let engine = EngineBuilder::new(config).build().await.unwrap();
        assert!(engine.recovered().is_empty());
        assert_eq!(engine.summary(10).await, summary);
        assert_eq!(engine.stats().await.feedback_applied, 2);
    }

    #[tokio::test]
    async fn each_corrupt_store_recovers_independently() {
        let dir = TempDir::new().unwrap();
        let config = HomeConfig::default().with_data_dir(dir.path());
        {
            let engine = EngineBuilder::new(config.clone()).build().await.unwrap();
            let result = engine.dispatch(dim_command()).await.unwrap();
            engine
                .attach_feedback(&result.record_id, FeedbackSignal::Positive, None)
                .await
                .unwrap();
        }

        std::fs::write(config.devices_path(), "not json").unwrap();
        std::fs::write(config.preferences_path(), "{").unwrap();

        let engine = EngineBuilder::new(config).build().await.unwrap();
        assert_eq!(engine.recovered().len(), 2);
        assert!(
            engine
                .recovered()
                .iter()
                .all(|e| matches!(e, HomeError::PersistenceReadCorruption { .. }))
        );

        // the log survived, so preferences are re-learned from it
        let stats = engine.stats().await;
        assert_eq!(stats.records.total, 1);
        assert_eq!(stats.preferences, 1);
        // device state was reset
        let lights = engine.get_state(None).await.unwrap();
        assert!(lights.iter().all(|d| d.state == d.kind.initial_state()));
    }

    #[tokio::test]
    async fn corrupt_log_alone_keeps_learned_preferences() {
        let dir = TempDir::new().unwrap();
        let config = HomeConfig::default().with_data_dir(dir.path());
        let summary = {
            let engine = EngineBuilder::new(config.clone()).build().await.unwrap();
            for _ in 0..2 {
                let result = engine.dispatch(dim_command()).await.unwrap();
                engine
                    .attach_feedback(&result.record_id, FeedbackSignal::Positive, None)
                    .await
                    .unwrap();
            }
            engine.summary(10).await
        };

        let log = std::fs::read_to_string(config.log_path()).unwrap();
        std::fs::write(config.log_path(), format!("garbage\n{log}")).unwrap();

        {
            let engine = EngineBuilder::new(config.clone()).build().await.unwrap();
            assert_eq!(engine.recovered().len(), 1);
            assert!(matches!(
                engine.recovered()[0],
                HomeError::PersistenceReadCorruption { store: "interaction log", .. }
            ));
            assert_eq!(engine.stats().await.records.total, 0);
            assert_eq!(engine.summary(10).await, summary);

            let result = engine.dispatch(dim_command()).await.unwrap();
            engine
                .attach_feedback(&result.record_id, FeedbackSignal::Positive, None)
                .await
                .unwrap();
        }

        // table and fresh log agree, so nothing is rebuilt away
        let engine = EngineBuilder::new(config).build().await.unwrap();
        assert!(engine.recovered().is_empty());
        assert_eq!(engine.stats().await.feedback_applied, 1);
        assert_eq!(engine.summary(10).await[0].entries[0].observations, 3);
    }
}

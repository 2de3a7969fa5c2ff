//! PreferenceStore - 文脈ごとの学習値
//!
//! # 操作
//! - `predict`: 読み取りのみ。信頼度が閾値未満なら提案値をそのまま返す
//! - `update`: 1 観測で 1 エントリを更新（positive は EMA、negative は信頼度のみ）
//! - `rebuild`: インタラクションログの履歴を先頭から再生して作り直す
//!
//! EMA は順序に依存するため、再生順はフィードバックが付与された順です。
//! エントリの `updated_at` もフィードバックの時刻を使うので、
//! 再生結果は逐次更新した結果と完全に一致します。

mod policy;

pub use self::policy::LearningPolicy;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{ContextKey, FeedbackSignal, HomeError, LearningSample};
use crate::ports::SnapshotStore;
use crate::retry::RetryPolicy;

pub const STORE_NAME: &str = "preference table";

/// Learned value for one context.
///
/// Created lazily by the first positive observation, superseded in place,
/// never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceEntry {
    pub context: ContextKey,
    pub learned_value: f64,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
    /// Number of observations (positive or negative) folded into this entry.
    #[serde(default)]
    pub observations: u32,
}

/// Persisted form of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceTable {
    pub entries: Vec<PreferenceEntry>,
    /// How many feedback events of the interaction log this table reflects.
    #[serde(default)]
    pub feedback_applied: u64,
}

/// One feedback event as replayed by `rebuild`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEvent {
    pub samples: Vec<LearningSample>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PreferenceCheckpoint {
    entries: BTreeMap<ContextKey, PreferenceEntry>,
    feedback_applied: u64,
}

pub struct PreferenceStore {
    entries: BTreeMap<ContextKey, PreferenceEntry>,
    feedback_applied: u64,
    policy: LearningPolicy,
    store: Box<dyn SnapshotStore<PreferenceTable>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("entries", &self.entries.len())
            .field("feedback_applied", &self.feedback_applied)
            .field("policy", &self.policy)
            .field("store", &self.store.describe())
            .finish()
    }
}

impl PreferenceStore {
    /// Load the persisted table. A missing table starts empty; an unreadable
    /// one is quarantined, starts empty and is returned as the recovered error.
    pub fn load(
        policy: LearningPolicy,
        store: Box<dyn SnapshotStore<PreferenceTable>>,
        retry: RetryPolicy,
    ) -> (Self, Option<HomeError>) {
        let mut prefs = Self {
            entries: BTreeMap::new(),
            feedback_applied: 0,
            policy,
            store,
            retry,
        };

        let mut recovered = None;
        match prefs.store.load() {
            Ok(Some(table)) => {
                prefs.feedback_applied = table.feedback_applied;
                prefs.entries = table
                    .entries
                    .into_iter()
                    .map(|entry| (entry.context.clone(), entry))
                    .collect();
                info!(
                    store = %prefs.store.describe(),
                    entries = prefs.entries.len(),
                    feedback_applied = prefs.feedback_applied,
                    "loaded preference table"
                );
            }
            Ok(None) => debug!(store = %prefs.store.describe(), "no preference table yet"),
            Err(source) => {
                let corrupt = source.is_corrupt();
                let err = HomeError::PersistenceReadCorruption {
                    store: STORE_NAME,
                    source,
                };
                warn!(error = %err, "starting with empty preferences");
                if corrupt {
                    match prefs.store.quarantine() {
                        Ok(Some(aside)) => warn!(moved_to = %aside, "quarantined preference table"),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "could not quarantine preference table"),
                    }
                }
                recovered = Some(err);
            }
        }
        (prefs, recovered)
    }

    pub fn policy(&self) -> &LearningPolicy {
        &self.policy
    }

    /// Learned value for `key` if it is trusted, `proposed` otherwise.
    ///
    /// Never mutates the store.
    pub fn predict(&self, key: &ContextKey, proposed: f64) -> f64 {
        match self.entries.get(key) {
            Some(entry) if self.policy.trusts(entry.confidence) => entry.learned_value,
            _ => proposed,
        }
    }

    pub fn entry(&self, key: &ContextKey) -> Option<&PreferenceEntry> {
        self.entries.get(key)
    }

    /// Entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = &PreferenceEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of feedback events folded into the store.
    pub fn feedback_applied(&self) -> u64 {
        self.feedback_applied
    }

    /// Fold one observation into the entry for `key`. In memory only.
    pub fn update(
        &mut self,
        key: &ContextKey,
        observed: f64,
        signal: FeedbackSignal,
        at: DateTime<Utc>,
    ) {
        match (signal, self.entries.get_mut(key)) {
            (FeedbackSignal::None, _) => {}
            (FeedbackSignal::Positive, None) => {
                self.entries.insert(
                    key.clone(),
                    PreferenceEntry {
                        context: key.clone(),
                        learned_value: observed,
                        confidence: self.policy.initial_confidence,
                        updated_at: at,
                        observations: 1,
                    },
                );
                debug!(context = %key, value = observed, "created preference");
            }
            (FeedbackSignal::Positive, Some(entry)) => {
                entry.learned_value = self.policy.blend(entry.learned_value, observed);
                entry.confidence = self.policy.reinforce(entry.confidence);
                entry.updated_at = at;
                entry.observations += 1;
                debug!(context = %key, value = entry.learned_value, confidence = entry.confidence, "reinforced preference");
            }
            (FeedbackSignal::Negative, Some(entry)) => {
                entry.confidence = self.policy.weaken(entry.confidence);
                entry.updated_at = at;
                entry.observations += 1;
                debug!(context = %key, confidence = entry.confidence, "weakened preference");
            }
            // nothing learned yet, nothing to weaken
            (FeedbackSignal::Negative, None) => {}
        }
    }

    /// Fold the samples of one feedback event. In memory only.
    pub fn learn(&mut self, samples: &[LearningSample], at: DateTime<Utc>) {
        for sample in samples {
            self.update(&sample.context, sample.value, sample.signal, at);
        }
        self.feedback_applied += 1;
    }

    /// Clear and replay the full feedback history in order, then flush.
    ///
    /// The in-memory result stands even if the flush fails; the error tells
    /// the caller the table on disk is stale.
    pub async fn rebuild(
        &mut self,
        history: impl IntoIterator<Item = FeedbackEvent>,
    ) -> Result<(), HomeError> {
        self.entries.clear();
        self.feedback_applied = 0;
        for event in history {
            self.learn(&event.samples, event.at);
        }
        info!(
            entries = self.entries.len(),
            feedback_applied = self.feedback_applied,
            "rebuilt preferences from interaction log"
        );
        self.flush().await
    }

    /// Keep every entry but count them as reflecting `feedback_applied`
    /// events. For a table that outlived a reset interaction log.
    pub fn adopt_watermark(&mut self, feedback_applied: u64) {
        self.feedback_applied = feedback_applied;
    }

    pub fn checkpoint(&self) -> PreferenceCheckpoint {
        PreferenceCheckpoint {
            entries: self.entries.clone(),
            feedback_applied: self.feedback_applied,
        }
    }

    /// Put the in-memory state back. Call `flush` to persist it.
    pub fn restore(&mut self, checkpoint: PreferenceCheckpoint) {
        self.entries = checkpoint.entries;
        self.feedback_applied = checkpoint.feedback_applied;
    }

    pub fn table(&self) -> PreferenceTable {
        PreferenceTable {
            entries: self.entries.values().cloned().collect(),
            feedback_applied: self.feedback_applied,
        }
    }

    /// Write the table with bounded retry.
    pub async fn flush(&self) -> Result<(), HomeError> {
        let table = self.table();
        self.retry
            .run(STORE_NAME, || self.store.save(&table))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cue, TimeBucket};
    use crate::impls::MemorySnapshotStore;
    use crate::ports::StoreError;
    use crate::testing::FailingSnapshotStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap()
    }

    fn key() -> ContextKey {
        ContextKey::new("set_brightness", "level", TimeBucket::Evening, Cue::Dim)
    }

    fn store() -> PreferenceStore {
        let (prefs, recovered) = PreferenceStore::load(
            LearningPolicy::default(),
            Box::new(MemorySnapshotStore::<PreferenceTable>::new()),
            RetryPolicy::no_retry(),
        );
        assert!(recovered.is_none());
        prefs
    }

    fn sample(value: f64, signal: FeedbackSignal) -> LearningSample {
        LearningSample {
            context: key(),
            value,
            signal,
        }
    }

    #[test]
    fn first_positive_creates_entry() {
        let mut prefs = store();
        prefs.update(&key(), 40.0, FeedbackSignal::Positive, t0());
        let entry = prefs.entry(&key()).unwrap();
        assert_eq!(entry.learned_value, 40.0);
        assert_eq!(entry.confidence, 1.0);
        assert_eq!(entry.updated_at, t0());
    }

    #[test]
    fn positive_applies_ema_and_bumps_confidence() {
        let mut prefs = store();
        prefs.update(&key(), 40.0, FeedbackSignal::Positive, t0());
        prefs.update(&key(), 50.0, FeedbackSignal::Positive, t0());
        let entry = prefs.entry(&key()).unwrap();
        assert!((entry.learned_value - 43.0).abs() < 1e-9);
        assert_eq!(entry.confidence, 2.0);
        assert_eq!(entry.observations, 2);
    }

    #[test]
    fn confidence_is_monotonic_under_positive_feedback_and_capped() {
        let mut prefs = store();
        let mut last = 0.0;
        for i in 0..25 {
            prefs.update(&key(), 30.0 + i as f64, FeedbackSignal::Positive, t0());
            let confidence = prefs.entry(&key()).unwrap().confidence;
            assert!(confidence >= last);
            last = confidence;
        }
        assert_eq!(last, prefs.policy().max_confidence);
    }

    #[test]
    fn negative_lowers_confidence_but_keeps_value() {
        let mut prefs = store();
        for _ in 0..3 {
            prefs.update(&key(), 40.0, FeedbackSignal::Positive, t0());
        }
        let before = prefs.entry(&key()).unwrap().clone();

        prefs.update(&key(), 90.0, FeedbackSignal::Negative, t0());
        let after = prefs.entry(&key()).unwrap();
        assert_eq!(after.learned_value, before.learned_value);
        assert_eq!(after.confidence, before.confidence - 1.0);

        for _ in 0..10 {
            prefs.update(&key(), 90.0, FeedbackSignal::Negative, t0());
        }
        assert_eq!(prefs.entry(&key()).unwrap().confidence, 0.0);
    }

    #[test]
    fn negative_or_none_without_entry_creates_nothing() {
        let mut prefs = store();
        prefs.update(&key(), 40.0, FeedbackSignal::Negative, t0());
        prefs.update(&key(), 40.0, FeedbackSignal::None, t0());
        assert!(prefs.is_empty());
    }

    #[test]
    fn predict_overrides_only_when_trusted() {
        let mut prefs = store();
        prefs.update(&key(), 40.0, FeedbackSignal::Positive, t0());
        assert_eq!(prefs.predict(&key(), 80.0), 80.0);

        prefs.update(&key(), 40.0, FeedbackSignal::Positive, t0());
        assert_eq!(prefs.predict(&key(), 80.0), 40.0);

        let other = ContextKey::new("set_brightness", "level", TimeBucket::Morning, Cue::Dim);
        assert_eq!(prefs.predict(&other, 80.0), 80.0);
    }

    #[test]
    fn predict_is_pure() {
        let mut prefs = store();
        prefs.update(&key(), 40.0, FeedbackSignal::Positive, t0());
        prefs.update(&key(), 40.0, FeedbackSignal::Positive, t0());
        let before = prefs.table();
        let first = prefs.predict(&key(), 80.0);
        for _ in 0..10 {
            assert_eq!(prefs.predict(&key(), 80.0), first);
        }
        assert_eq!(prefs.table(), before);
    }

    #[tokio::test]
    async fn rebuild_matches_incremental_store() {
        let events: Vec<FeedbackEvent> = [
            (40.0, FeedbackSignal::Positive),
            (55.0, FeedbackSignal::Positive),
            (90.0, FeedbackSignal::Negative),
            (35.0, FeedbackSignal::Positive),
            (20.0, FeedbackSignal::Positive),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, (value, signal))| FeedbackEvent {
            samples: vec![sample(value, signal)],
            at: t0() + Duration::minutes(i as i64),
        })
        .collect();

        let mut incremental = store();
        for event in &events {
            incremental.learn(&event.samples, event.at);
        }

        let mut rebuilt = store();
        rebuilt.update(&key(), 999.0, FeedbackSignal::Positive, t0());
        rebuilt.rebuild(events.clone()).await.unwrap();
        assert_eq!(rebuilt.table(), incremental.table());

        // order matters
        let mut reversed = store();
        reversed.rebuild(events.into_iter().rev()).await.unwrap();
        assert_ne!(reversed.table(), incremental.table());
    }

    #[test]
    fn table_survives_reload() {
        let mut prefs = store();
        prefs.learn(&[sample(40.0, FeedbackSignal::Positive)], t0());
        let table = prefs.table();

        let (reloaded, _) = PreferenceStore::load(
            LearningPolicy::default(),
            Box::new(MemorySnapshotStore::with_value(table.clone())),
            RetryPolicy::no_retry(),
        );
        assert_eq!(reloaded.table(), table);
        assert_eq!(reloaded.feedback_applied(), 1);
    }

    #[test]
    fn corrupt_table_starts_empty() {
        let store = FailingSnapshotStore::<PreferenceTable>::new();
        let switch = store.handle();
        switch.corrupt_reads(true);
        let (prefs, recovered) =
            PreferenceStore::load(LearningPolicy::default(), Box::new(store), RetryPolicy::no_retry());
        assert!(matches!(recovered, Some(HomeError::PersistenceReadCorruption { .. })));
        assert!(prefs.is_empty());
        assert_eq!(prefs.feedback_applied(), 0);
        assert_eq!(switch.quarantines(), 1);
    }

    #[test]
    fn unreadable_table_is_not_quarantined() {
        let store = FailingSnapshotStore::<PreferenceTable>::new();
        let switch = store.handle();
        switch.fail_reads(true);
        let (prefs, recovered) =
            PreferenceStore::load(LearningPolicy::default(), Box::new(store), RetryPolicy::no_retry());
        assert!(matches!(
            recovered,
            Some(HomeError::PersistenceReadCorruption { source: StoreError::Io { .. }, .. })
        ));
        assert!(prefs.is_empty());
        assert_eq!(switch.quarantines(), 0);
    }

    #[test]
    fn adopted_watermark_keeps_entries() {
        let mut prefs = store();
        prefs.learn(&[sample(40.0, FeedbackSignal::Positive)], t0());
        prefs.learn(&[sample(40.0, FeedbackSignal::Positive)], t0());

        prefs.adopt_watermark(0);
        assert_eq!(prefs.feedback_applied(), 0);
        assert_eq!(prefs.predict(&key(), 80.0), 40.0);
    }

    #[test]
    fn checkpoint_restore_undoes_learning() {
        let mut prefs = store();
        prefs.learn(&[sample(40.0, FeedbackSignal::Positive)], t0());
        let checkpoint = prefs.checkpoint();
        let before = prefs.table();

        prefs.learn(&[sample(10.0, FeedbackSignal::Positive)], t0());
        assert_ne!(prefs.table(), before);

        prefs.restore(checkpoint);
        assert_eq!(prefs.table(), before);
    }
}

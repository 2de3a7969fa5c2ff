//! FeedbackRecorder - 追記専用のインタラクション記録
//!
//! # 責務
//! - dispatch ごとに InteractionRecord を 1 件追記し、ID を返す
//! - フィードバックを 1 回だけ受け付け（ウィンドウ内のみ）、PreferenceStore に渡す
//! - `rebuild` 用に、フィードバックの付与順で学習履歴を返す
//!
//! # 永続化
//! レコードは書き換えず、フィードバックは別イベントとして追記します。
//! 起動時にイベントを畳み込んでメモリ上のレコードを復元します。

pub use crate::domain::RecordState;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    Arguments, Feedback, FeedbackSignal, HomeError, InteractionRecord, LearningSample,
    NewInteraction, RecordId,
};
use crate::ports::{Clock, IdGenerator, InteractionLog, LogEvent};
use crate::preference::{FeedbackEvent, PreferenceStore};
use crate::retry::RetryPolicy;

pub const STORE_NAME: &str = "interaction log";

/// Feedback that passed every check and is ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFeedback {
    pub record_id: RecordId,
    pub feedback: Feedback,
    pub samples: Vec<LearningSample>,
}

/// What `attach_feedback` did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReceipt {
    pub record_id: RecordId,
    pub state: RecordState,
    /// Observations forwarded to the PreferenceStore.
    pub learned: Vec<LearningSample>,
}

pub struct FeedbackRecorder {
    /// Insertion order.
    records: Vec<InteractionRecord>,
    index: HashMap<RecordId, usize>,
    /// Record ids in the order their feedback was attached.
    feedback_order: Vec<RecordId>,
    log: Box<dyn InteractionLog>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    window: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for FeedbackRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackRecorder")
            .field("records", &self.records.len())
            .field("feedback", &self.feedback_order.len())
            .field("window", &self.window)
            .field("log", &self.log.describe())
            .finish()
    }
}

impl FeedbackRecorder {
    /// Replay the log into memory. An unreadable log is quarantined and the
    /// recorder starts empty; the recovered error is returned next to it.
    pub fn load(
        log: Box<dyn InteractionLog>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        window: Duration,
        retry: RetryPolicy,
    ) -> (Self, Option<HomeError>) {
        let mut recorder = Self {
            records: Vec::new(),
            index: HashMap::new(),
            feedback_order: Vec::new(),
            log,
            ids,
            clock,
            window,
            retry,
        };

        let mut recovered = None;
        match recorder.log.load() {
            Ok(events) => {
                for event in events {
                    recorder.fold(event);
                }
                info!(
                    log = %recorder.log.describe(),
                    records = recorder.records.len(),
                    feedback = recorder.feedback_order.len(),
                    "loaded interaction log"
                );
            }
            Err(source) => {
                let corrupt = source.is_corrupt();
                let err = HomeError::PersistenceReadCorruption {
                    store: STORE_NAME,
                    source,
                };
                warn!(error = %err, "starting with an empty interaction log");
                if corrupt {
                    match recorder.log.quarantine() {
                        Ok(Some(aside)) => warn!(moved_to = %aside, "quarantined interaction log"),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "could not quarantine interaction log"),
                    }
                }
                recovered = Some(err);
            }
        }
        (recorder, recovered)
    }

    fn fold(&mut self, event: LogEvent) {
        match event {
            LogEvent::Recorded { record } => {
                if self.index.contains_key(&record.id) {
                    warn!(record_id = %record.id, "duplicate record in log, keeping the first");
                    return;
                }
                self.index.insert(record.id, self.records.len());
                self.records.push(record);
            }
            LogEvent::FeedbackAttached {
                record_id,
                feedback,
            } => {
                let Some(&at) = self.index.get(&record_id) else {
                    warn!(%record_id, "feedback for unknown record in log, skipping");
                    return;
                };
                let record = &mut self.records[at];
                if record.feedback.is_some() {
                    warn!(%record_id, "second feedback for record in log, skipping");
                    return;
                }
                record.feedback = Some(feedback);
                self.feedback_order.push(record_id);
            }
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Store a new record (write-through) and return its id.
    pub async fn append(&mut self, draft: NewInteraction) -> Result<RecordId, HomeError> {
        let record = InteractionRecord::new(self.ids.generate_record_id(), self.clock.now(), draft);
        let id = record.id;
        let event = LogEvent::Recorded {
            record: record.clone(),
        };
        self.retry
            .run(STORE_NAME, || self.log.append(&event))
            .await?;

        self.index.insert(id, self.records.len());
        self.records.push(record);
        debug!(record_id = %id, "recorded interaction");
        Ok(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&InteractionRecord> {
        self.index.get(id).map(|&at| &self.records[at])
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[InteractionRecord] {
        &self.records
    }

    /// The last `n` records, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &InteractionRecord> {
        self.records.iter().rev().take(n)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of feedback attachments in the log.
    pub fn feedback_count(&self) -> u64 {
        self.feedback_order.len() as u64
    }

    /// Learning history in feedback-attachment order, for `PreferenceStore::rebuild`.
    pub fn learning_history(&self) -> Vec<FeedbackEvent> {
        self.feedback_order
            .iter()
            .filter_map(|id| self.get(id))
            .filter_map(|record| {
                record.feedback.as_ref().map(|feedback| FeedbackEvent {
                    samples: record.learning_samples(feedback),
                    at: feedback.attached_at,
                })
            })
            .collect()
    }

    /// Check that feedback may be attached to `id` now. Nothing is changed.
    pub fn prepare_feedback(
        &self,
        id: &RecordId,
        signal: FeedbackSignal,
        correction: Option<Arguments>,
    ) -> Result<PendingFeedback, HomeError> {
        let record = self.get(id).ok_or(HomeError::RecordNotFound(*id))?;
        if !record.state().can_transition_to(RecordState::FeedbackAttached) {
            return Err(HomeError::FeedbackAlreadyAttached(*id));
        }

        let now = self.clock.now();
        let age = now - record.recorded_at;
        if age > self.window {
            return Err(HomeError::FeedbackWindowExpired {
                record_id: *id,
                age_secs: age.num_seconds(),
                window_secs: self.window.num_seconds(),
            });
        }

        let correction = correction.filter(|c| !c.is_empty());
        if let Some(correction) = &correction {
            validate_correction(record, correction)?;
        }

        let feedback = Feedback {
            signal,
            correction,
            attached_at: now,
        };
        let samples = record.learning_samples(&feedback);
        Ok(PendingFeedback {
            record_id: *id,
            feedback,
            samples,
        })
    }

    /// Persist prepared feedback and move the record to its terminal state.
    pub async fn commit_feedback(&mut self, pending: &PendingFeedback) -> Result<(), HomeError> {
        let event = LogEvent::FeedbackAttached {
            record_id: pending.record_id,
            feedback: pending.feedback.clone(),
        };
        self.retry
            .run(STORE_NAME, || self.log.append(&event))
            .await?;
        self.fold(event);
        Ok(())
    }

    /// Attach feedback to a record and forward what it teaches to `prefs`.
    ///
    /// Either the preference table, the log and the record all reflect the
    /// feedback, or none of them do.
    pub async fn attach_feedback(
        &mut self,
        prefs: &mut PreferenceStore,
        id: &RecordId,
        signal: FeedbackSignal,
        correction: Option<Arguments>,
    ) -> Result<FeedbackReceipt, HomeError> {
        let pending = self.prepare_feedback(id, signal, correction)?;

        let checkpoint = prefs.checkpoint();
        prefs.learn(&pending.samples, pending.feedback.attached_at);
        if let Err(err) = prefs.flush().await {
            prefs.restore(checkpoint);
            return Err(err);
        }

        if let Err(err) = self.commit_feedback(&pending).await {
            prefs.restore(checkpoint);
            if let Err(e) = prefs.flush().await {
                // the watermark check at startup will rebuild the table
                warn!(error = %e, "preference table is ahead of the interaction log");
            }
            return Err(err);
        }

        info!(
            record_id = %pending.record_id,
            signal = ?signal,
            learned = pending.samples.len(),
            "attached feedback"
        );
        Ok(FeedbackReceipt {
            record_id: pending.record_id,
            state: RecordState::FeedbackAttached,
            learned: pending.samples,
        })
    }

    /// Drop every record (reset).
    pub async fn clear(&mut self) -> Result<(), HomeError> {
        self.retry.run(STORE_NAME, || self.log.clear()).await?;
        self.records.clear();
        self.index.clear();
        self.feedback_order.clear();
        Ok(())
    }
}

/// A correction may only name parameters of the record's operation, with
/// values that pass its schema.
fn validate_correction(record: &InteractionRecord, correction: &Arguments) -> Result<(), HomeError> {
    let spec = record
        .kind
        .and_then(|kind| kind.operation(&record.operation))
        .ok_or_else(|| {
            HomeError::invalid_argument(
                "correction",
                format!("`{}` was never resolved to a device operation", record.operation),
            )
        })?;
    for (name, value) in correction {
        let param = spec.param(name).ok_or_else(|| {
            HomeError::invalid_argument(name.as_str(), format!("not a parameter of `{}`", spec.name))
        })?;
        param.check(value)?;
    }
    Ok(())
}

//! CommandDispatcher - 1 コマンドの処理を端から端まで行う
//!
//! validate → predict → mutate → record の順に実行します。
//!
//! # 排他
//! 各リソース（registry / preferences / recorder）は tokio の Mutex で守られ、
//! ロックは常にこの順で取得します。1 コマンドの処理中は関係するロックを
//! 保持したままなので、コマンド同士が交互に進むことはありません。
//!
//! # 失敗時
//! - 検証エラー: 副作用なし。失敗として記録し、`Ok(DispatchResult { success: false, .. })`
//! - 永続化エラー: デバイス状態を戻してから `Err`

use std::sync::Arc;

use chrono::FixedOffset;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::status::{EngineStats, PreferenceSummary, RecordCounts};
use crate::domain::{
    ApplyReport, Arguments, ContextKey, Device, DeviceKind, DispatchResult, ErrorKind,
    ErrorReport, FeedbackSignal, HomeError, InteractionRecord, LearnedParameter, NewInteraction,
    OutcomeKind, RecordId, RecordOutcome, RecordStatus, ResolvedCommand, Target,
};
use crate::ports::Clock;
use crate::preference::PreferenceStore;
use crate::recorder::{FeedbackReceipt, FeedbackRecorder};
use crate::registry::DeviceRegistry;

/// Arguments after preference overrides, ready for the registry.
struct Plan {
    target: Target,
    kind: DeviceKind,
    requested: Arguments,
    applied: Arguments,
    learned: Vec<LearnedParameter>,
}

pub struct CommandDispatcher {
    registry: Mutex<DeviceRegistry>,
    preferences: Mutex<PreferenceStore>,
    recorder: Mutex<FeedbackRecorder>,
    utc_offset: FixedOffset,
    clock: Arc<dyn Clock>,
    recovered: Vec<HomeError>,
}

impl CommandDispatcher {
    pub(crate) fn new(
        registry: DeviceRegistry,
        preferences: PreferenceStore,
        recorder: FeedbackRecorder,
        utc_offset: FixedOffset,
        clock: Arc<dyn Clock>,
        recovered: Vec<HomeError>,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            preferences: Mutex::new(preferences),
            recorder: Mutex::new(recorder),
            utc_offset,
            clock,
            recovered,
        }
    }

    /// Stores that were unreadable at startup and have been reset.
    pub fn recovered(&self) -> &[HomeError] {
        &self.recovered
    }

    /// Run one resolved command.
    ///
    /// `Err` is returned only when something could not be persisted; every
    /// other failure is a recorded, unsuccessful `DispatchResult`.
    pub async fn dispatch(&self, command: ResolvedCommand) -> Result<DispatchResult, HomeError> {
        let mut registry = self.registry.lock().await;
        let preferences = self.preferences.lock().await;
        let mut recorder = self.recorder.lock().await;

        info!(operation = %command.operation, raw_text = %command.raw_text, "dispatching command");

        let plan = match self.plan(&registry, &preferences, &command) {
            Ok(plan) => plan,
            Err(err) => {
                let requested = command
                    .split_target()
                    .map(|(_, params)| params)
                    .unwrap_or_else(|_| command.arguments.clone());
                let draft = new_interaction(&command, None, None, requested.clone(), requested, Vec::new());
                return reject(&mut recorder, draft, err).await;
            }
        };

        let checkpoint = registry.checkpoint();
        let report = match registry
            .apply_operation(&plan.target, &command.operation, &plan.applied)
            .await
        {
            Ok(report) => report,
            Err(err) => {
                let draft = new_interaction(
                    &command,
                    Some(plan.target),
                    Some(plan.kind),
                    plan.requested,
                    plan.applied,
                    plan.learned,
                );
                return reject(&mut recorder, draft, err).await;
            }
        };

        let success = report.succeeded();
        let mut draft = new_interaction(
            &command,
            Some(plan.target.clone()),
            Some(plan.kind),
            plan.requested,
            plan.applied,
            plan.learned,
        );
        draft.outcome = outcome(&report);

        let overrides: Vec<LearnedParameter> =
            draft.learned.iter().filter(|l| l.overridden()).cloned().collect();

        let record_id = match recorder.append(draft).await {
            Ok(id) => id,
            Err(err) => {
                if report.any_changed() {
                    registry.restore(checkpoint);
                    if let Err(e) = registry.flush().await {
                        error!(error = %e, "could not persist device rollback");
                    }
                }
                error!(error = %err, "interaction not recorded, command rolled back");
                return Err(err);
            }
        };

        for o in &overrides {
            info!(
                %record_id,
                context = %o.context,
                proposed = o.proposed,
                applied = o.applied,
                "applied learned preference"
            );
        }

        Ok(DispatchResult {
            record_id,
            success,
            message: message(&command.operation, &plan.target, &report),
            per_target: report.outcomes,
            overrides,
            error: None,
        })
    }

    /// Resolve the target and operation and apply preference overrides.
    fn plan(
        &self,
        registry: &DeviceRegistry,
        preferences: &PreferenceStore,
        command: &ResolvedCommand,
    ) -> Result<Plan, HomeError> {
        let (target, requested) = command.split_target()?;
        let kind = registry.resolve_kind(&target)?;
        let spec = registry.operation_spec(&target, &command.operation)?;

        // one decision per command, shared by every device of a batch
        let mut applied = requested.clone();
        let mut learned = Vec::new();
        for param in spec.learnable_params() {
            let Some(value) = requested.get(param.name) else {
                continue;
            };
            if param.check(value).is_err() {
                // left for validation to reject as requested
                continue;
            }
            let Some(proposed) = value.as_f64() else {
                continue;
            };
            let context = ContextKey::derive(
                &command.operation,
                param.name,
                &command.raw_text,
                command.timestamp,
                self.utc_offset,
            );
            let predicted = preferences.predict(&context, proposed);
            let Some(final_value) = param.numeric_value(predicted) else {
                continue;
            };
            let applied_num = final_value.as_f64().unwrap_or(proposed);
            if applied_num != proposed {
                applied.insert(param.name.to_string(), final_value);
            }
            learned.push(LearnedParameter {
                parameter: param.name.to_string(),
                context,
                proposed,
                applied: applied_num,
            });
        }

        Ok(Plan {
            target,
            kind,
            requested,
            applied,
            learned,
        })
    }

    /// Attach feedback to a dispatched record.
    pub async fn attach_feedback(
        &self,
        record_id: &RecordId,
        signal: FeedbackSignal,
        correction: Option<Arguments>,
    ) -> Result<FeedbackReceipt, HomeError> {
        let mut preferences = self.preferences.lock().await;
        let mut recorder = self.recorder.lock().await;
        recorder
            .attach_feedback(&mut preferences, record_id, signal, correction)
            .await
            .inspect_err(|err| {
                if err.kind() == ErrorKind::Persistence {
                    error!(%record_id, error = %err, "feedback not persisted");
                } else {
                    warn!(%record_id, error = %err, "feedback rejected");
                }
            })
    }

    /// Rebuild the preference table from the interaction log.
    ///
    /// Returns the number of entries after the rebuild.
    pub async fn rebuild_preferences(&self) -> Result<usize, HomeError> {
        let mut preferences = self.preferences.lock().await;
        let recorder = self.recorder.lock().await;
        preferences.rebuild(recorder.learning_history()).await?;
        Ok(preferences.len())
    }

    /// Current state of `target`, or of every device.
    pub async fn get_state(&self, target: Option<&Target>) -> Result<Vec<Device>, HomeError> {
        let registry = self.registry.lock().await;
        match target {
            Some(target) => registry.get_state(target),
            None => Ok(registry.devices().to_vec()),
        }
    }

    /// Re-read the device snapshot from disk.
    pub async fn reload_devices(&self) -> Option<HomeError> {
        self.registry.lock().await.reload()
    }

    /// Restore every device to its initial state. With `history`, also drop
    /// the interaction log and everything learned from it.
    ///
    /// Returns how many devices changed.
    pub async fn reset(&self, history: bool) -> Result<usize, HomeError> {
        let mut registry = self.registry.lock().await;
        let mut preferences = self.preferences.lock().await;
        let mut recorder = self.recorder.lock().await;

        let changed = registry.reset_all().await?;
        if history {
            recorder.clear().await?;
            preferences.rebuild(Vec::new()).await?;
            info!("cleared interaction history and preferences");
        }
        Ok(changed)
    }

    pub async fn record(&self, id: &RecordId) -> Option<InteractionRecord> {
        self.recorder.lock().await.get(id).cloned()
    }

    /// The last `n` records, newest first.
    pub async fn recent(&self, n: usize) -> Vec<InteractionRecord> {
        self.recorder.lock().await.recent(n).cloned().collect()
    }

    pub async fn summary(&self, top: usize) -> Vec<PreferenceSummary> {
        PreferenceSummary::collect(self.preferences.lock().await.entries(), top)
    }

    pub async fn stats(&self) -> EngineStats {
        let registry = self.registry.lock().await;
        let preferences = self.preferences.lock().await;
        let recorder = self.recorder.lock().await;
        EngineStats {
            devices: registry.devices().len(),
            records: RecordCounts::tally(recorder.records()),
            preferences: preferences.len(),
            trusted_preferences: preferences
                .entries()
                .filter(|e| preferences.policy().trusts(e.confidence))
                .count(),
            feedback_applied: preferences.feedback_applied(),
        }
    }

    /// Flush every snapshot one last time. Errors are logged, not returned.
    pub async fn shutdown(self) {
        let registry = self.registry.into_inner();
        let preferences = self.preferences.into_inner();
        if let Err(e) = registry.flush().await {
            warn!(error = %e, "device snapshot not flushed at shutdown");
        }
        if let Err(e) = preferences.flush().await {
            warn!(error = %e, "preference table not flushed at shutdown");
        }
        info!(at = %self.clock.now(), "engine stopped");
    }
}

fn new_interaction(
    command: &ResolvedCommand,
    target: Option<Target>,
    kind: Option<DeviceKind>,
    requested: Arguments,
    applied: Arguments,
    learned: Vec<LearnedParameter>,
) -> NewInteraction {
    NewInteraction {
        timestamp: command.timestamp,
        raw_text: command.raw_text.clone(),
        operation: command.operation.clone(),
        target,
        kind,
        requested,
        applied,
        learned,
        outcome: RecordOutcome::rejected(""),
    }
}

/// Record a command that changed nothing.
async fn reject(
    recorder: &mut FeedbackRecorder,
    mut draft: NewInteraction,
    err: HomeError,
) -> Result<DispatchResult, HomeError> {
    let message = err.to_string();
    draft.outcome = RecordOutcome::rejected(message.clone());
    let record_id = recorder.append(draft).await?;

    if err.kind() == ErrorKind::Persistence {
        error!(%record_id, error = %err, "command failed to persist");
        return Err(err);
    }
    warn!(%record_id, error = %err, "command rejected");
    Ok(DispatchResult {
        record_id,
        success: false,
        message,
        per_target: Vec::new(),
        overrides: Vec::new(),
        error: Some(ErrorReport::from(&err)),
    })
}

fn outcome(report: &ApplyReport) -> RecordOutcome {
    let failed = report.count(OutcomeKind::Failed);
    let error = (!report.succeeded()).then(|| {
        report
            .outcomes
            .iter()
            .filter_map(|o| o.error.clone())
            .next()
            .unwrap_or_else(|| "no device changed".to_string())
    });
    RecordOutcome {
        status: if report.succeeded() {
            RecordStatus::Succeeded
        } else {
            RecordStatus::Failed
        },
        changed: report.count(OutcomeKind::Changed),
        unchanged: report.count(OutcomeKind::Unchanged),
        failed,
        error,
    }
}

fn message(operation: &str, target: &Target, report: &ApplyReport) -> String {
    let changed = report.count(OutcomeKind::Changed);
    let unchanged = report.count(OutcomeKind::Unchanged);
    let failed = report.count(OutcomeKind::Failed);
    if report.batch {
        return format!(
            "{operation} on {target}: {changed} changed, {unchanged} already set, {failed} failed"
        );
    }
    match report.outcomes.first() {
        Some(o) if o.kind == OutcomeKind::Changed => format!("{operation} applied to {target}"),
        Some(o) if o.kind == OutcomeKind::Unchanged => {
            format!("{target} is already in the requested state")
        }
        Some(o) => format!(
            "{operation} failed on {target}: {}",
            o.error.as_deref().unwrap_or("unknown error")
        ),
        None => format!("{operation} reached no device"),
    }
}

//! Interaction records: one per dispatched command, immutable once written
//! apart from a single feedback attachment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::ContextKey;
use super::device::{Arguments, DeviceKind, Target};
use super::ids::RecordId;
use super::state::RecordState;

/// The user's verdict on a shown result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSignal {
    Positive,
    Negative,
    None,
}

impl std::str::FromStr for FeedbackSignal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" | "+" | "y" | "yes" | "good" => Ok(FeedbackSignal::Positive),
            "negative" | "-" | "n" | "no" | "bad" => Ok(FeedbackSignal::Negative),
            "none" | "skip" => Ok(FeedbackSignal::None),
            other => Err(format!("unknown feedback signal `{other}`")),
        }
    }
}

/// Feedback attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub signal: FeedbackSignal,
    /// Corrected arguments (parameter -> value), if the user supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<Arguments>,
    pub attached_at: DateTime<Utc>,
}

/// A learnable parameter of the dispatched command and the decision made for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedParameter {
    pub parameter: String,
    pub context: ContextKey,
    /// Value the resolver asked for.
    pub proposed: f64,
    /// Value actually applied (after a possible override).
    pub applied: f64,
}

impl LearnedParameter {
    pub fn overridden(&self) -> bool {
        self.proposed != self.applied
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Succeeded,
    Failed,
}

/// Summary of what the command did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub status: RecordStatus,
    #[serde(default)]
    pub changed: usize,
    #[serde(default)]
    pub unchanged: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            status: RecordStatus::Failed,
            changed: 0,
            unchanged: 0,
            failed: 0,
            error: Some(error.into()),
        }
    }
}

/// Everything the dispatcher knows about a command before the recorder
/// assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInteraction {
    pub timestamp: DateTime<Utc>,
    pub raw_text: String,
    pub operation: String,
    pub target: Option<Target>,
    pub kind: Option<DeviceKind>,
    pub requested: Arguments,
    pub applied: Arguments,
    pub learned: Vec<LearnedParameter>,
    pub outcome: RecordOutcome,
}

/// One dispatched command.
///
/// `requested` (pre-override arguments) is never altered after creation,
/// including when feedback is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: RecordId,
    /// Timestamp carried by the resolved command.
    pub timestamp: DateTime<Utc>,
    /// Clock time at which the record was written; the feedback window starts here.
    pub recorded_at: DateTime<Utc>,
    pub raw_text: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DeviceKind>,
    pub requested: Arguments,
    pub applied: Arguments,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub learned: Vec<LearnedParameter>,
    pub outcome: RecordOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

/// One observation forwarded to `PreferenceStore::update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSample {
    pub context: ContextKey,
    pub value: f64,
    pub signal: FeedbackSignal,
}

impl InteractionRecord {
    pub fn new(id: RecordId, recorded_at: DateTime<Utc>, draft: NewInteraction) -> Self {
        Self {
            id,
            timestamp: draft.timestamp,
            recorded_at,
            raw_text: draft.raw_text,
            operation: draft.operation,
            target: draft.target,
            kind: draft.kind,
            requested: draft.requested,
            applied: draft.applied,
            learned: draft.learned,
            outcome: draft.outcome,
            feedback: None,
        }
    }

    pub fn state(&self) -> RecordState {
        if self.feedback.is_some() {
            RecordState::FeedbackAttached
        } else {
            RecordState::Created
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.status == RecordStatus::Succeeded
    }

    /// Observations this feedback produces for the PreferenceStore.
    ///
    /// - failed commands produce nothing
    /// - a corrected value replaces the rejection for the parameter it names
    ///   and is learned as `positive`
    /// - otherwise the applied value is forwarded with the signal as given
    pub fn learning_samples(&self, feedback: &Feedback) -> Vec<LearningSample> {
        if !self.succeeded() {
            return Vec::new();
        }
        self.learned
            .iter()
            .filter_map(|learned| {
                let corrected = feedback
                    .correction
                    .as_ref()
                    .and_then(|c| c.get(&learned.parameter))
                    .and_then(|v| v.as_f64());
                match (corrected, feedback.signal) {
                    (Some(value), _) => Some(LearningSample {
                        context: learned.context.clone(),
                        value,
                        signal: FeedbackSignal::Positive,
                    }),
                    (None, FeedbackSignal::None) => None,
                    (None, signal) => Some(LearningSample {
                        context: learned.context.clone(),
                        value: learned.applied,
                        signal,
                    }),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::{Cue, TimeBucket};
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn record(status: RecordStatus) -> InteractionRecord {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap();
        let context = ContextKey::new("set_brightness", "level", TimeBucket::Evening, Cue::Dim);
        InteractionRecord::new(
            RecordId::from_ulid(Ulid::new()),
            ts,
            NewInteraction {
                timestamp: ts,
                raw_text: "dim the lights".to_string(),
                operation: "set_brightness".to_string(),
                target: Some(Target::Device("lamp".into())),
                kind: Some(DeviceKind::Light),
                requested: [("level".to_string(), json!(80))].into(),
                applied: [("level".to_string(), json!(40))].into(),
                learned: vec![LearnedParameter {
                    parameter: "level".to_string(),
                    context,
                    proposed: 80.0,
                    applied: 40.0,
                }],
                outcome: RecordOutcome {
                    status,
                    changed: 1,
                    unchanged: 0,
                    failed: 0,
                    error: None,
                },
            },
        )
    }

    fn feedback(signal: FeedbackSignal, correction: Option<serde_json::Value>) -> Feedback {
        Feedback {
            signal,
            correction: correction.map(|v| serde_json::from_value(v).unwrap()),
            attached_at: Utc.with_ymd_and_hms(2024, 3, 1, 18, 1, 0).unwrap(),
        }
    }

    #[test]
    fn new_record_is_created_state() {
        let r = record(RecordStatus::Succeeded);
        assert_eq!(r.state(), RecordState::Created);
        assert!(r.learned[0].overridden());
    }

    #[rstest]
    #[case::positive(FeedbackSignal::Positive, 40.0)]
    #[case::negative(FeedbackSignal::Negative, 40.0)]
    fn samples_use_applied_value(#[case] signal: FeedbackSignal, #[case] value: f64) {
        let samples = record(RecordStatus::Succeeded).learning_samples(&feedback(signal, None));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, value);
        assert_eq!(samples[0].signal, signal);
    }

    #[test]
    fn none_signal_produces_nothing() {
        let samples =
            record(RecordStatus::Succeeded).learning_samples(&feedback(FeedbackSignal::None, None));
        assert!(samples.is_empty());
    }

    #[test]
    fn correction_is_learned_as_positive() {
        let fb = feedback(FeedbackSignal::Negative, Some(json!({"level": 25})));
        let samples = record(RecordStatus::Succeeded).learning_samples(&fb);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].signal, FeedbackSignal::Positive);
        assert_eq!(samples[0].value, 25.0);
    }

    #[test]
    fn failed_records_never_teach() {
        let fb = feedback(FeedbackSignal::Positive, Some(json!({"level": 25})));
        assert!(record(RecordStatus::Failed).learning_samples(&fb).is_empty());
    }

    #[rstest]
    #[case("positive", FeedbackSignal::Positive)]
    #[case("Y", FeedbackSignal::Positive)]
    #[case("no", FeedbackSignal::Negative)]
    #[case("none", FeedbackSignal::None)]
    fn signal_parses(#[case] input: &str, #[case] expected: FeedbackSignal) {
        assert_eq!(input.parse::<FeedbackSignal>().unwrap(), expected);
    }
}

//! Status - 集計ビュー（統計・学習サマリ）

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{FeedbackSignal, InteractionRecord, RecordStatus};
use crate::preference::PreferenceEntry;

/// Counts of records by state and signal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub total: usize,
    /// No feedback yet.
    pub pending: usize,
    pub positive: usize,
    pub negative: usize,
    pub none: usize,
    /// Commands that did not succeed.
    pub failed: usize,
}

impl RecordCounts {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a InteractionRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.total += 1;
            if record.outcome.status == RecordStatus::Failed {
                counts.failed += 1;
            }
            match record.feedback.as_ref().map(|f| f.signal) {
                None => counts.pending += 1,
                Some(FeedbackSignal::Positive) => counts.positive += 1,
                Some(FeedbackSignal::Negative) => counts.negative += 1,
                Some(FeedbackSignal::None) => counts.none += 1,
            }
        }
        counts
    }
}

/// Top learned entries of one (operation, parameter) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSummary {
    pub operation: String,
    pub parameter: String,
    /// Highest confidence first.
    pub entries: Vec<PreferenceEntry>,
}

impl PreferenceSummary {
    pub fn collect<'a>(
        entries: impl IntoIterator<Item = &'a PreferenceEntry>,
        top: usize,
    ) -> Vec<Self> {
        let mut groups: BTreeMap<(String, String), Vec<PreferenceEntry>> = BTreeMap::new();
        for entry in entries {
            groups
                .entry((entry.context.operation.clone(), entry.context.parameter.clone()))
                .or_default()
                .push(entry.clone());
        }
        groups
            .into_iter()
            .map(|((operation, parameter), mut entries)| {
                entries.sort_by(|a, b| {
                    b.confidence
                        .total_cmp(&a.confidence)
                        .then_with(|| a.context.cmp(&b.context))
                });
                entries.truncate(top);
                Self {
                    operation,
                    parameter,
                    entries,
                }
            })
            .collect()
    }
}

/// Overall engine status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub devices: usize,
    pub records: RecordCounts,
    pub preferences: usize,
    /// Entries confident enough to override a proposed value.
    pub trusted_preferences: usize,
    pub feedback_applied: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContextKey, Cue, TimeBucket};
    use chrono::{TimeZone, Utc};

    fn entry(param: &str, cue: Cue, confidence: f64) -> PreferenceEntry {
        PreferenceEntry {
            context: ContextKey::new("set_brightness", param, TimeBucket::Evening, cue),
            learned_value: 40.0,
            confidence,
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap(),
            observations: 1,
        }
    }

    #[test]
    fn summary_groups_and_ranks_by_confidence() {
        let entries = vec![
            entry("level", Cue::Dim, 1.0),
            entry("level", Cue::Bright, 5.0),
            entry("level", Cue::Neutral, 3.0),
        ];
        let summary = PreferenceSummary::collect(&entries, 2);
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].parameter, "level");
        let confidences: Vec<f64> = summary[0].entries.iter().map(|e| e.confidence).collect();
        assert_eq!(confidences, vec![5.0, 3.0]);
    }

    #[test]
    fn empty_history_counts_nothing() {
        assert_eq!(RecordCounts::tally(&Vec::<InteractionRecord>::new()), RecordCounts::default());
    }
}

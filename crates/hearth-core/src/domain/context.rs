//! Context keys: the grouping under which preferences are learned.
//!
//! A key is (operation, parameter, time-of-day bucket, cue). Derivation is a
//! pure function of its inputs so the same scenario always lands on the same key.

use std::fmt;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Coarse time-of-day bucket (local hour).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    /// 05:00 - 08:00
    EarlyMorning,
    /// 08:00 - 12:00
    Morning,
    /// 12:00 - 17:00
    Afternoon,
    /// 17:00 - 21:00
    Evening,
    /// 21:00 - 24:00
    Night,
    /// 00:00 - 05:00
    LateNight,
}

impl TimeBucket {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=7 => TimeBucket::EarlyMorning,
            8..=11 => TimeBucket::Morning,
            12..=16 => TimeBucket::Afternoon,
            17..=20 => TimeBucket::Evening,
            0..=4 => TimeBucket::LateNight,
            _ => TimeBucket::Night,
        }
    }

    pub fn at(timestamp: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self::from_hour(timestamp.with_timezone(&offset).hour())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeBucket::EarlyMorning => "early_morning",
            TimeBucket::Morning => "morning",
            TimeBucket::Afternoon => "afternoon",
            TimeBucket::Evening => "evening",
            TimeBucket::Night => "night",
            TimeBucket::LateNight => "late_night",
        }
    }
}

/// Coarse intent cue extracted from the user's own words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cue {
    TooHot,
    TooCold,
    /// Wants less light ("dim", "too bright").
    Dim,
    /// Wants more light ("too dark", "brighter").
    Bright,
    Sleep,
    Neutral,
}

/// Ordered keyword table. First cue with a matching keyword wins.
///
/// ASCII keywords match on word boundaries; other keywords match as substrings.
const CUE_KEYWORDS: &[(Cue, &[&str])] = &[
    (
        Cue::TooHot,
        &["too hot", "hot", "warm", "stuffy", "boiling", "太热", "好热", "热"],
    ),
    (
        Cue::TooCold,
        &["too cold", "cold", "chilly", "freezing", "太冷", "好冷", "冷"],
    ),
    (
        Cue::Dim,
        &["too bright", "dim", "dimmer", "glare", "太亮", "刺眼", "暗一点", "调暗"],
    ),
    (
        Cue::Bright,
        &["too dark", "brighter", "太暗", "亮一点", "调亮"],
    ),
    (
        Cue::Sleep,
        &["sleep", "sleeping", "bedtime", "bed", "睡觉", "睡"],
    ),
];

impl Cue {
    pub fn extract(text: &str) -> Self {
        let lowered = text.to_lowercase();
        // " word word " so word-boundary matches are plain substring checks
        let words: Vec<&str> = lowered
            .split(|c: char| c.is_ascii() && !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let padded = format!(" {} ", words.join(" "));

        CUE_KEYWORDS
            .iter()
            .find(|(_, keywords)| {
                keywords.iter().any(|kw| {
                    if kw.is_ascii() {
                        padded.contains(&format!(" {kw} "))
                    } else {
                        lowered.contains(kw)
                    }
                })
            })
            .map(|(cue, _)| *cue)
            .unwrap_or(Cue::Neutral)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cue::TooHot => "too-hot",
            Cue::TooCold => "too-cold",
            Cue::Dim => "dim",
            Cue::Bright => "bright",
            Cue::Sleep => "sleep",
            Cue::Neutral => "neutral",
        }
    }
}

/// Composite key indexing the PreferenceStore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextKey {
    pub operation: String,
    pub parameter: String,
    pub bucket: TimeBucket,
    pub cue: Cue,
}

impl ContextKey {
    pub fn new(
        operation: impl Into<String>,
        parameter: impl Into<String>,
        bucket: TimeBucket,
        cue: Cue,
    ) -> Self {
        Self {
            operation: operation.into(),
            parameter: parameter.into(),
            bucket,
            cue,
        }
    }

    /// Derive the key for an operation/parameter pair from the raw text and
    /// the command's timestamp.
    pub fn derive(
        operation: &str,
        parameter: &str,
        raw_text: &str,
        timestamp: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Self {
        Self::new(
            operation,
            parameter,
            TimeBucket::at(timestamp, offset),
            Cue::extract(raw_text),
        )
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}@{}#{}",
            self.operation,
            self.parameter,
            self.bucket.as_str(),
            self.cue.as_str()
        )
    }
}

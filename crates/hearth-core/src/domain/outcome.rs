//! Outcome model: per-device results of an applied operation and the
//! structured result handed back to the presentation layer.
//!
//! Partial success of a batch is always reported per device; it is never
//! collapsed into a single boolean without the breakdown next to it.

use serde::{Deserialize, Serialize};

use super::device::{DeviceId, StateMap};
use super::errors::{ErrorKind, HomeError};
use super::ids::RecordId;
use super::interaction::LearnedParameter;

/// What happened to one targeted device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// State changed.
    Changed,
    /// Device was already in the requested state (no-op).
    Unchanged,
    /// Device rejected the operation (e.g. opening a locked door).
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub id: DeviceId,
    pub kind: OutcomeKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<StateMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetOutcome {
    pub fn changed(id: DeviceId, state: StateMap) -> Self {
        Self {
            id,
            kind: OutcomeKind::Changed,
            success: true,
            new_state: Some(state),
            error: None,
        }
    }

    pub fn unchanged(id: DeviceId, state: StateMap) -> Self {
        Self {
            id,
            kind: OutcomeKind::Unchanged,
            success: true,
            new_state: Some(state),
            error: None,
        }
    }

    pub fn failed(id: DeviceId, error: impl Into<String>) -> Self {
        Self {
            id,
            kind: OutcomeKind::Failed,
            success: false,
            new_state: None,
            error: Some(error.into()),
        }
    }
}

/// Result of `DeviceRegistry::apply_operation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub batch: bool,
    pub outcomes: Vec<TargetOutcome>,
}

impl ApplyReport {
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    pub fn any_changed(&self) -> bool {
        self.count(OutcomeKind::Changed) > 0
    }

    /// Batch: at least one device changed state.
    /// Single device: the operation applied (changed or already satisfied).
    pub fn succeeded(&self) -> bool {
        if self.batch {
            self.any_changed()
        } else {
            !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.success)
        }
    }
}

/// Serializable error description for results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&HomeError> for ErrorReport {
    fn from(err: &HomeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Structured result of one dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub record_id: RecordId,
    pub success: bool,
    pub message: String,
    pub per_target: Vec<TargetOutcome>,
    /// Learnable parameters whose value was replaced by a learned preference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<LearnedParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

//! Record state machine: created -> feedback_attached (terminal).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Written, waiting for feedback.
    Created,
    /// Feedback attached. No further transitions.
    FeedbackAttached,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::FeedbackAttached)
    }

    /// The only legal transition.
    pub fn can_transition_to(self, next: RecordState) -> bool {
        matches!(
            (self, next),
            (RecordState::Created, RecordState::FeedbackAttached)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_created_to_feedback_attached() {
        use RecordState::*;
        assert!(Created.can_transition_to(FeedbackAttached));
        assert!(!FeedbackAttached.can_transition_to(Created));
        assert!(!FeedbackAttached.can_transition_to(FeedbackAttached));
        assert!(!Created.can_transition_to(Created));
        assert!(FeedbackAttached.is_terminal());
        assert!(!Created.is_terminal());
    }
}

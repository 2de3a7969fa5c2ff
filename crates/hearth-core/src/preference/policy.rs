//! Learning policy: decides how one observation moves an entry.

use serde::{Deserialize, Serialize};

/// Constants of the online update rule.
///
/// The defaults are tuning values, not semantics; every one of them can be
/// overridden from the `[learning]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningPolicy {
    /// EMA learning rate, 0 < alpha <= 1.
    pub alpha: f64,
    /// Confidence of an entry created by its first positive observation.
    pub initial_confidence: f64,
    /// Added on every further positive observation.
    pub confidence_step: f64,
    /// Subtracted on every negative observation.
    pub negative_step: f64,
    /// Confidence saturates here.
    pub max_confidence: f64,
    /// Minimum confidence before `predict` overrides the proposed value.
    pub threshold: f64,
}

impl Default for LearningPolicy {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            initial_confidence: 1.0,
            confidence_step: 1.0,
            negative_step: 1.0,
            max_confidence: 10.0,
            threshold: 2.0,
        }
    }
}

impl LearningPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(format!("learning.alpha {} must be in (0, 1]", self.alpha));
        }
        for (name, value) in [
            ("initial_confidence", self.initial_confidence),
            ("confidence_step", self.confidence_step),
            ("negative_step", self.negative_step),
            ("threshold", self.threshold),
        ] {
            if !(value >= 0.0) {
                return Err(format!("learning.{name} {value} must not be negative"));
            }
        }
        if !(self.max_confidence >= self.initial_confidence) {
            return Err(format!(
                "learning.max_confidence {} is below initial_confidence {}",
                self.max_confidence, self.initial_confidence
            ));
        }
        Ok(())
    }

    /// learned * (1 - alpha) + observed * alpha
    pub fn blend(&self, learned: f64, observed: f64) -> f64 {
        learned * (1.0 - self.alpha) + observed * self.alpha
    }

    pub fn reinforce(&self, confidence: f64) -> f64 {
        (confidence + self.confidence_step).min(self.max_confidence)
    }

    pub fn weaken(&self, confidence: f64) -> f64 {
        (confidence - self.negative_step).max(0.0)
    }

    pub fn trusts(&self, confidence: f64) -> bool {
        confidence >= self.threshold
    }
}

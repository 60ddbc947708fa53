//! Analysis output: a directional decision with its reasoning trail.

use crate::types::Instrument;
use serde::{Deserialize, Serialize};

/// Directional decision produced by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

/// Qualitative confidence label attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Moderate,
    Low,
}

/// One step of the fixed analysis sequence. Later steps add context but never
/// contradict earlier numeric facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub label: String,
    pub observation: String,
    pub conclusion: String,
}

impl ReasoningStep {
    pub fn new(
        label: impl Into<String>,
        observation: impl Into<String>,
        conclusion: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            observation: observation.into(),
            conclusion: conclusion.into(),
        }
    }
}

/// Immutable result of one analysis call. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub instrument: Instrument,
    pub steps: Vec<ReasoningStep>,
    pub decision: Decision,
    pub confidence: Confidence,
}

//! Anomaly detection over the sample stream
//!
//! This module provides:
//! - A pluggable scoring capability with two variants: a deterministic
//!   rule-based scorer (always available) and an ONNX model scorer
//! - The per-session classifier that holds the chosen scorer, a bounded
//!   trailing window, the session baseline, and the append-only alert list

mod classifier;
mod model;
mod rules;

pub use classifier::{AnomalyClassifier, SessionBaseline};
pub use model::OnnxScorer;
pub use rules::RuleScorer;

use crate::models::{AlertSeverity, AnomalyType, Evidence, Sample};

/// Context handed to a scorer alongside the sample under evaluation.
pub struct ScoreContext<'a> {
    /// Bounded trailing window of recent samples, oldest first, including
    /// the sample being scored.
    pub window: &'a [Sample],
    /// Session-lifetime baseline statistics for outlier checks.
    pub baseline: &'a SessionBaseline,
}

/// A scorer's verdict on one sample.
#[derive(Debug, Clone)]
pub struct Detection {
    pub anomaly_type: AnomalyType,
    pub severity: AlertSeverity,
    pub message: String,
    pub evidence: Evidence,
}

/// Scoring capability: decides whether a sample is anomalous and with what
/// suspected cause.
///
/// Selected once at session start and held for the session's lifetime. An
/// `Err` from a scorer switches the classifier to the rule-based variant
/// for the remainder of the session.
pub trait AnomalyScorer: Send + Sync {
    fn score(&self, sample: &Sample, ctx: &ScoreContext<'_>) -> anyhow::Result<Option<Detection>>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

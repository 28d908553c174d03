//! Per-session anomaly classifier
//!
//! Owns the scorer chosen at session start, a bounded ring of recent
//! samples for trend rules, session baseline statistics for outlier
//! checks, and the append-only alert list. The classifier keeps its own
//! read cursor over the session sample buffer and catches up when queried,
//! so it can never stall the sample producer.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::{rules, AnomalyScorer, Detection, RuleScorer, ScoreContext};
use crate::models::{AnomalyAlert, Sample};

/// Capacity of the trailing sample window.
const WINDOW_CAPACITY: usize = 30;

/// Samples required before z-scores against the baseline are meaningful.
const BASELINE_MIN_SAMPLES: u64 = 10;

/// Session-lifetime mean/variance for CPU and memory, maintained with
/// Welford's online algorithm for numerical stability.
#[derive(Debug, Clone, Default)]
pub struct SessionBaseline {
    count: u64,
    cpu_mean: f64,
    cpu_m2: f64,
    memory_mean: f64,
    memory_m2: f64,
}

impl SessionBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sample: &Sample) {
        self.count += 1;
        let n = self.count as f64;

        let cpu_delta = sample.cpu_percent - self.cpu_mean;
        self.cpu_mean += cpu_delta / n;
        self.cpu_m2 += cpu_delta * (sample.cpu_percent - self.cpu_mean);

        let mem_delta = sample.memory_percent - self.memory_mean;
        self.memory_mean += mem_delta / n;
        self.memory_m2 += mem_delta * (sample.memory_percent - self.memory_mean);
    }

    pub fn sample_count(&self) -> u64 {
        self.count
    }

    /// Z-score of a CPU reading against the baseline, if enough data exists.
    pub fn cpu_z(&self, value: f64) -> Option<f64> {
        self.z(value, self.cpu_mean, self.cpu_m2)
    }

    /// Z-score of a memory reading against the baseline.
    pub fn memory_z(&self, value: f64) -> Option<f64> {
        self.z(value, self.memory_mean, self.memory_m2)
    }

    fn z(&self, value: f64, mean: f64, m2: f64) -> Option<f64> {
        if self.count < BASELINE_MIN_SAMPLES {
            return None;
        }
        let variance = m2 / (self.count - 1) as f64;
        let std_dev = variance.sqrt();
        if std_dev < f64::EPSILON {
            return None;
        }
        Some((value - mean) / std_dev)
    }
}

/// Evaluates samples against the selected scorer and accumulates alerts.
pub struct AnomalyClassifier {
    primary: Box<dyn AnomalyScorer>,
    using_fallback: bool,
    window: VecDeque<Sample>,
    baseline: SessionBaseline,
    cursor: usize,
    alerts: Vec<AnomalyAlert>,
}

impl AnomalyClassifier {
    /// Classifier using the deterministic rule-based scorer.
    pub fn rule_based() -> Self {
        Self::with_scorer(Box::new(RuleScorer))
    }

    /// Rule-based classifier standing in for a scorer that failed to load;
    /// the capability flag is raised from the start.
    pub fn rule_based_fallback() -> Self {
        let mut classifier = Self::rule_based();
        classifier.using_fallback = true;
        classifier
    }

    /// Classifier using a caller-supplied scorer (e.g. a loaded model).
    pub fn with_scorer(primary: Box<dyn AnomalyScorer>) -> Self {
        Self {
            primary,
            using_fallback: false,
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            baseline: SessionBaseline::new(),
            cursor: 0,
            alerts: Vec::new(),
        }
    }

    /// True once a scorer error has forced the rule-based fallback.
    pub fn using_fallback_classifier(&self) -> bool {
        self.using_fallback
    }

    /// Advance over samples not yet classified.
    ///
    /// `samples` is the session's full append-only buffer; the classifier
    /// remembers how far it has read.
    pub fn catch_up(&mut self, samples: &[Sample]) {
        while self.cursor < samples.len() {
            let sample = samples[self.cursor].clone();
            self.cursor += 1;
            self.classify(&sample);
        }
    }

    /// Accumulated alerts, in detection order.
    pub fn alerts(&self) -> &[AnomalyAlert] {
        &self.alerts
    }

    fn classify(&mut self, sample: &Sample) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(sample.clone());
        self.window.make_contiguous();

        let outcome = {
            let ctx = ScoreContext {
                window: self.window.as_slices().0,
                baseline: &self.baseline,
            };
            if self.using_fallback {
                Ok(rules::evaluate(sample, &ctx))
            } else {
                self.primary.score(sample, &ctx)
            }
        };

        let detection = match outcome {
            Ok(detection) => detection,
            Err(error) => {
                warn!(
                    scorer = self.primary.name(),
                    error = %error,
                    "Scorer failed, using rule-based fallback for the rest of the session"
                );
                self.using_fallback = true;
                let ctx = ScoreContext {
                    window: self.window.as_slices().0,
                    baseline: &self.baseline,
                };
                rules::evaluate(sample, &ctx)
            }
        };

        // Baseline updated after scoring so an outlier does not soften its
        // own z-score.
        self.baseline.observe(sample);

        if let Some(detection) = detection {
            debug!(
                anomaly_type = %detection.anomaly_type,
                severity = %detection.severity,
                timestamp = sample.timestamp,
                "Anomaly detected"
            );
            self.alerts.push(alert_from(sample, detection));
        }
    }
}

fn alert_from(sample: &Sample, detection: Detection) -> AnomalyAlert {
    AnomalyAlert {
        sample_reference: sample.timestamp,
        anomaly_type: detection.anomaly_type,
        severity: detection.severity,
        message: detection.message,
        evidence: detection.evidence,
    }
}

//! ONNX model scoring using tract
//!
//! Optional statistical scorer backed by a trained outlier model. The model
//! consumes a 5-feature vector per sample and emits one decision score;
//! scores below the threshold mark the sample anomalous. Loading is
//! fallible and the classifier substitutes the rule-based scorer when it
//! fails, so a missing or broken model file is degraded mode, never fatal.

use anyhow::{Context, Result};
use tract_onnx::prelude::*;

use super::{rules, AnomalyScorer, Detection, ScoreContext};
use crate::models::{AlertSeverity, AnomalyType, Evidence, Sample};

/// Number of input features expected by the model.
const NUM_FEATURES: usize = 5;

/// Decision threshold: scores below this are anomalous.
const SCORE_THRESHOLD: f32 = 0.0;

/// Score below which an outlier is high severity.
const SCORE_HIGH_SEVERITY: f32 = -0.5;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Statistical anomaly scorer backed by an ONNX outlier model.
pub struct OnnxScorer {
    model: TractModel,
}

impl OnnxScorer {
    /// Load a scorer from model bytes.
    pub fn new(model_bytes: &[u8]) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, NUM_FEATURES]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(Self { model })
    }

    /// Load a scorer from a model file on disk.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        Self::new(&bytes)
    }

    fn features_to_tensor(sample: &Sample) -> Tensor {
        let data = vec![
            sample.cpu_percent as f32,
            sample.memory_percent as f32,
            sample.memory_used_gb as f32,
            sample.disk_read_mb as f32,
            sample.disk_write_mb as f32,
        ];
        tract_ndarray::Array2::from_shape_vec((1, NUM_FEATURES), data)
            .unwrap()
            .into()
    }
}

impl AnomalyScorer for OnnxScorer {
    fn score(&self, sample: &Sample, ctx: &ScoreContext<'_>) -> Result<Option<Detection>> {
        let input = Self::features_to_tensor(sample);
        let result = self.model.run(tvec!(input.into()))?;
        let output = result.first().context("No output from model")?;
        let score = *output
            .to_array_view::<f32>()?
            .iter()
            .next()
            .context("Empty output tensor from model")?;

        if score >= SCORE_THRESHOLD {
            return Ok(None);
        }

        // The model only knows "unusual"; the cause label comes from the
        // rule table when a row matches.
        let detection = rules::evaluate(sample, ctx).unwrap_or_else(|| {
            let severity = if score < SCORE_HIGH_SEVERITY {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            Detection {
                anomaly_type: AnomalyType::AnomalousBehavior,
                severity,
                message: format!("Model flagged sample as an outlier (score {score:.3})"),
                evidence: Evidence::from_sample(sample),
            }
        });

        Ok(Some(detection))
    }

    fn name(&self) -> &'static str {
        "onnx_model"
    }
}

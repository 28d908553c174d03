//! Rule-based anomaly scoring
//!
//! A deterministic decision table evaluated top to bottom, first match
//! wins. The memory-leak rule requires a rising trend over the trailing
//! window rather than a single reading, so one spike cannot fire it.

use super::{Detection, ScoreContext};
use crate::models::{AlertSeverity, AnomalyType, Evidence, Sample};

/// CPU percentage above which a low-memory sample looks like mining.
const MINING_CPU_THRESHOLD: f64 = 90.0;

/// Memory ceiling for the mining pattern (miners burn CPU, not memory).
const MINING_MEMORY_CEILING: f64 = 40.0;

/// Memory percentage above which a low-CPU sample suggests a leak.
const LEAK_MEMORY_THRESHOLD: f64 = 85.0;

/// CPU ceiling for the leak pattern.
const LEAK_CPU_CEILING: f64 = 30.0;

/// Combined disk read+write MB rate that marks I/O overload.
const IO_OVERLOAD_THRESHOLD: f64 = 500.0;

/// Combined rate above which an I/O overload is high severity.
const IO_OVERLOAD_HIGH: f64 = 1000.0;

/// Both CPU and memory above this mark resource exhaustion.
const EXHAUSTION_THRESHOLD: f64 = 80.0;

/// Percentage above which a triggering metric escalates to high severity.
const HIGH_SEVERITY_PERCENT: f64 = 95.0;

/// Z-score magnitude that marks a sample as a statistical outlier.
const Z_SCORE_TRIGGER: f64 = 3.0;

/// Z-score magnitude above which an outlier is high severity.
const Z_SCORE_HIGH: f64 = 4.5;

/// Minimum window samples before the memory trend can confirm.
const TREND_MIN_SAMPLES: usize = 3;

/// Fraction of consecutive deltas that must be non-decreasing for a trend.
const TREND_MONOTONICITY: f64 = 0.6;

/// The always-available deterministic scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleScorer;

impl super::AnomalyScorer for RuleScorer {
    fn score(
        &self,
        sample: &Sample,
        ctx: &ScoreContext<'_>,
    ) -> anyhow::Result<Option<Detection>> {
        Ok(evaluate(sample, ctx))
    }

    fn name(&self) -> &'static str {
        "rule_based"
    }
}

fn percent_severity(value: f64) -> AlertSeverity {
    if value > HIGH_SEVERITY_PERCENT {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    }
}

/// Walk the decision table for one sample.
///
/// Also used by the model scorer to attribute a cause label to samples the
/// model flags as anomalous.
pub(super) fn evaluate(sample: &Sample, ctx: &ScoreContext<'_>) -> Option<Detection> {
    let cpu = sample.cpu_percent;
    let mem = sample.memory_percent;
    let io = sample.io_rate_mb();

    if cpu > MINING_CPU_THRESHOLD && mem < MINING_MEMORY_CEILING {
        return Some(Detection {
            anomaly_type: AnomalyType::CryptoMining,
            severity: percent_severity(cpu),
            message: format!(
                "Sustained CPU usage at {cpu:.1}% with low memory ({mem:.1}%) matches a \
                 mining workload"
            ),
            evidence: Evidence::from_sample(sample),
        });
    }

    if mem > LEAK_MEMORY_THRESHOLD && cpu < LEAK_CPU_CEILING && rising_memory_trend(ctx.window) {
        return Some(Detection {
            anomaly_type: AnomalyType::MemoryLeak,
            severity: percent_severity(mem),
            message: format!(
                "Memory at {mem:.1}% and rising over the recent window while CPU stays at \
                 {cpu:.1}%"
            ),
            evidence: Evidence::from_sample(sample),
        });
    }

    if io > IO_OVERLOAD_THRESHOLD {
        let severity = if io > IO_OVERLOAD_HIGH {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        return Some(Detection {
            anomaly_type: AnomalyType::IoOverload,
            severity,
            message: format!(
                "Combined disk rate {io:.1} MB (read {:.1}, write {:.1})",
                sample.disk_read_mb, sample.disk_write_mb
            ),
            evidence: Evidence::from_sample(sample),
        });
    }

    if cpu > EXHAUSTION_THRESHOLD && mem > EXHAUSTION_THRESHOLD {
        return Some(Detection {
            anomaly_type: AnomalyType::ResourceExhaustion,
            severity: percent_severity(cpu.max(mem)),
            message: format!(
                "CPU {cpu:.1}% and memory {mem:.1}% saturated simultaneously"
            ),
            evidence: Evidence::from_sample(sample),
        });
    }

    // Statistical outlier against the session baseline.
    let z_cpu = ctx.baseline.cpu_z(cpu);
    let z_mem = ctx.baseline.memory_z(mem);
    let z = match (z_cpu, z_mem) {
        (Some(a), Some(b)) => Some(if a.abs() >= b.abs() { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    if let Some(z) = z {
        if z.abs() > Z_SCORE_TRIGGER {
            let severity = if z.abs() > Z_SCORE_HIGH {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            return Some(Detection {
                anomaly_type: AnomalyType::AnomalousBehavior,
                severity,
                message: format!(
                    "Sample deviates {z:.1} standard deviations from the session baseline"
                ),
                evidence: Evidence::from_sample(sample).with_z_score(z),
            });
        }
    }

    None
}

/// Whether memory usage rises over the window: positive regression slope and
/// most consecutive deltas non-decreasing.
fn rising_memory_trend(window: &[Sample]) -> bool {
    if window.len() < TREND_MIN_SAMPLES {
        return false;
    }

    let mut non_decreasing = 0usize;
    for pair in window.windows(2) {
        if pair[1].memory_percent >= pair[0].memory_percent {
            non_decreasing += 1;
        }
    }
    let monotonicity = non_decreasing as f64 / (window.len() - 1) as f64;
    if monotonicity < TREND_MONOTONICITY {
        return false;
    }

    memory_slope(window) > 0.0
}

/// Least-squares slope of memory_percent over the window timestamps.
fn memory_slope(window: &[Sample]) -> f64 {
    let n = window.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let t0 = window[0].timestamp;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for sample in window {
        let x = sample.timestamp - t0;
        let y = sample.memory_percent;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

//! Risk assessment over cycle and thread data
//!
//! Two distinct paths produce an analysis. With lock instrumentation the
//! assessment is graph-backed and a detected cycle is hard evidence of a
//! circular wait. Without it the assessment degrades to a heuristic over an
//! external thread census; that path can only estimate risk and never
//! reports cycles. The `mode` field of the result keeps the two apart.

use std::collections::BTreeSet;

use super::WaitForGraph;
use crate::models::{AnalysisMode, Cycle, DeadlockAnalysis, RiskLevel, ThreadCensus};

/// Tuning bands for the thread-census heuristic.
///
/// The exact numbers are a calibration choice, not part of the analysis
/// contract; they can move without breaking consumers.
#[derive(Debug, Clone)]
pub struct HeuristicBands {
    /// Census size above which risk is at least medium.
    pub max_threads: usize,
    /// Minimum waiting-like threads before the fraction band applies.
    pub min_waiting: usize,
    /// Waiting-like fraction of the census above which risk is medium.
    pub waiting_fraction: f64,
}

impl Default for HeuristicBands {
    fn default() -> Self {
        Self {
            max_threads: 128,
            min_waiting: 2,
            waiting_fraction: 0.5,
        }
    }
}

/// Turns cycle/thread data into a risk level and implicated nodes.
#[derive(Debug, Clone, Default)]
pub struct RiskAssessor {
    bands: HeuristicBands,
}

impl RiskAssessor {
    pub fn new(bands: HeuristicBands) -> Self {
        Self { bands }
    }

    /// Graph-backed assessment. A real cycle is always high risk.
    pub fn assess(
        &self,
        graph: &WaitForGraph,
        cycles: &[Cycle],
        locks_tracked: usize,
    ) -> DeadlockAnalysis {
        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            cycles = cycles.len(),
            "Assessed wait-for graph"
        );
        let nodes_in_cycles: BTreeSet<u64> = cycles.iter().flatten().copied().collect();
        let risk_level = if cycles.is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::High
        };

        DeadlockAnalysis {
            has_cycles: !cycles.is_empty(),
            cycle_count: cycles.len(),
            risk_level,
            nodes_in_cycles,
            total_locks_tracked: locks_tracked,
            mode: AnalysisMode::WaitForGraph,
        }
    }

    /// Heuristic assessment from a thread census.
    ///
    /// `has_cycles` stays false on this path: a crowded or wait-heavy census
    /// is a proxy signal, never a witness of an actual circular wait.
    pub fn assess_census(&self, census: ThreadCensus, locks_tracked: usize) -> DeadlockAnalysis {
        let waiting_fraction = if census.thread_count == 0 {
            0.0
        } else {
            census.waiting_threads as f64 / census.thread_count as f64
        };

        let contended = census.waiting_threads >= self.bands.min_waiting
            && waiting_fraction >= self.bands.waiting_fraction;
        let crowded = census.thread_count > self.bands.max_threads;

        let risk_level = if contended || crowded {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        DeadlockAnalysis {
            has_cycles: false,
            cycle_count: 0,
            risk_level,
            nodes_in_cycles: BTreeSet::new(),
            total_locks_tracked: locks_tracked,
            mode: AnalysisMode::ThreadCensus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadlock::{detect_cycles, WaitGraphBuilder};
    use crate::models::{LockAction, LockEvent};

    fn event(thread_id: u64, lock_id: &str, action: LockAction) -> LockEvent {
        LockEvent {
            thread_id,
            lock_id: lock_id.to_string(),
            action,
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_cycle_is_always_high_risk() {
        let mut builder = WaitGraphBuilder::new();
        builder.record_event(&event(1, "a", LockAction::Acquire));
        builder.record_event(&event(2, "b", LockAction::Acquire));
        builder.record_event(&event(1, "b", LockAction::WaitStart));
        builder.record_event(&event(2, "a", LockAction::WaitStart));

        let graph = builder.snapshot();
        let cycles = detect_cycles(&graph);
        let analysis = RiskAssessor::default().assess(&graph, &cycles, builder.locks_tracked());

        assert!(analysis.has_cycles);
        assert_eq!(analysis.cycle_count, 1);
        assert_eq!(analysis.risk_level, RiskLevel::High);
        assert_eq!(
            analysis.nodes_in_cycles,
            BTreeSet::from([1, 2]),
        );
        assert_eq!(analysis.total_locks_tracked, 2);
        assert_eq!(analysis.mode, AnalysisMode::WaitForGraph);
    }

    #[test]
    fn test_acyclic_graph_is_low_risk() {
        let mut builder = WaitGraphBuilder::new();
        builder.record_event(&event(2, "a", LockAction::Acquire));
        builder.record_event(&event(1, "a", LockAction::WaitStart));

        let graph = builder.snapshot();
        let cycles = detect_cycles(&graph);
        let analysis = RiskAssessor::default().assess(&graph, &cycles, builder.locks_tracked());

        assert!(!analysis.has_cycles);
        assert_eq!(analysis.cycle_count, 0);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_census_wait_heavy_is_medium() {
        let assessor = RiskAssessor::default();
        let analysis = assessor.assess_census(
            ThreadCensus {
                thread_count: 8,
                waiting_threads: 6,
            },
            0,
        );

        assert_eq!(analysis.risk_level, RiskLevel::Medium);
        assert_eq!(analysis.mode, AnalysisMode::ThreadCensus);
        // The heuristic can never claim a real cycle.
        assert!(!analysis.has_cycles);
        assert_eq!(analysis.cycle_count, 0);
    }

    #[test]
    fn test_census_quiet_is_low() {
        let assessor = RiskAssessor::default();
        let analysis = assessor.assess_census(
            ThreadCensus {
                thread_count: 12,
                waiting_threads: 1,
            },
            0,
        );
        assert_eq!(analysis.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_census_crowded_is_medium() {
        let assessor = RiskAssessor::default();
        let analysis = assessor.assess_census(
            ThreadCensus {
                thread_count: 300,
                waiting_threads: 0,
            },
            0,
        );
        assert_eq!(analysis.risk_level, RiskLevel::Medium);
    }
}

//! Core data models for the profiling pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One resource-usage measurement for a profiled target.
///
/// Timestamps are seconds since session start. Samples are append-only and
/// never mutated once recorded; `phase` is the label assigned by the
/// segmenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub disk_read_mb: f64,
    pub disk_write_mb: f64,
    pub network_sent_mb: f64,
    pub network_recv_mb: f64,
    #[serde(default)]
    pub phase: Option<PhaseType>,
}

impl Sample {
    /// Combined disk read+write rate in MB, the I/O-wait proxy used by both
    /// the segmenter and the anomaly rules.
    pub fn io_rate_mb(&self) -> f64 {
        self.disk_read_mb + self.disk_write_mb
    }
}

/// Behavioral regime of a sampled timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    CpuBound,
    IoBound,
    MemoryBound,
    Idle,
    Mixed,
}

impl std::fmt::Display for PhaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseType::CpuBound => write!(f, "cpu_bound"),
            PhaseType::IoBound => write!(f, "io_bound"),
            PhaseType::MemoryBound => write!(f, "memory_bound"),
            PhaseType::Idle => write!(f, "idle"),
            PhaseType::Mixed => write!(f, "mixed"),
        }
    }
}

/// A maximal run of consecutive samples sharing one phase type.
///
/// Segments for a session are contiguous, non-overlapping, and cover the
/// full sampled timeline; boundaries exist only at phase transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSegment {
    pub start: f64,
    pub end: f64,
    #[serde(rename = "type")]
    pub phase: PhaseType,
    pub duration: f64,
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub avg_memory: f64,
    pub max_memory: f64,
    pub avg_io_mb: f64,
    pub sample_count: usize,
}

/// Lock lifecycle action reported by an instrumented target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockAction {
    Acquire,
    Release,
    WaitStart,
    WaitTimeout,
}

/// One lock acquire/release/wait event for a thread.
///
/// Events for one thread are totally ordered by `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    pub thread_id: u64,
    pub lock_id: String,
    pub action: LockAction,
    pub timestamp: f64,
}

/// A closed walk in the wait-for graph, stored without repeating the first
/// node and rotated to start at its minimum thread id.
pub type Cycle = Vec<u64>;

/// Risk classification for a deadlock analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Which path produced a deadlock analysis.
///
/// `WaitForGraph` results are backed by real lock events and can carry
/// concrete cycles; `ThreadCensus` results are a heuristic estimate from
/// thread counts and never report cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    WaitForGraph,
    ThreadCensus,
}

/// Deadlock-risk assessment, recomputed fresh on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockAnalysis {
    pub has_cycles: bool,
    pub cycle_count: usize,
    pub risk_level: RiskLevel,
    pub nodes_in_cycles: BTreeSet<u64>,
    pub total_locks_tracked: usize,
    pub mode: AnalysisMode,
}

/// Thread descriptor for graph rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

/// Wait-for edge for graph rendering: `source` is blocked on a lock held by
/// `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: String,
}

/// Full deadlock query result: the analysis plus renderable nodes/edges when
/// a true wait-for graph is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub analysis: DeadlockAnalysis,
    pub cycles: Vec<Cycle>,
    pub nodes: Vec<ThreadNode>,
    pub edges: Vec<WaitEdge>,
}

/// External thread census for the heuristic risk path, taken when no lock
/// instrumentation is wired into the target.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ThreadCensus {
    pub thread_count: usize,
    pub waiting_threads: usize,
}

/// Suspected cause of an anomalous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    CryptoMining,
    MemoryLeak,
    IoOverload,
    ResourceExhaustion,
    AnomalousBehavior,
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyType::CryptoMining => write!(f, "CRYPTO_MINING"),
            AnomalyType::MemoryLeak => write!(f, "MEMORY_LEAK"),
            AnomalyType::IoOverload => write!(f, "IO_OVERLOAD"),
            AnomalyType::ResourceExhaustion => write!(f, "RESOURCE_EXHAUSTION"),
            AnomalyType::AnomalousBehavior => write!(f, "ANOMALOUS_BEHAVIOR"),
        }
    }
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
        }
    }
}

/// Feature values that triggered an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub disk_read_mb: f64,
    pub disk_write_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
}

impl Evidence {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            cpu_percent: sample.cpu_percent,
            memory_percent: sample.memory_percent,
            memory_used_gb: sample.memory_used_gb,
            disk_read_mb: sample.disk_read_mb,
            disk_write_mb: sample.disk_write_mb,
            z_score: None,
        }
    }

    pub fn with_z_score(mut self, z: f64) -> Self {
        self.z_score = Some(z);
        self
    }
}

/// Anomaly alert, append-only per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    /// Timestamp of the sample that triggered this alert.
    pub sample_reference: f64,
    pub anomaly_type: AnomalyType,
    pub severity: AlertSeverity,
    pub message: String,
    pub evidence: Evidence,
}

/// Aggregate summary returned when a session stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub sample_count: usize,
    pub duration: f64,
    pub avg_cpu: f64,
    pub max_cpu: f64,
    pub avg_memory: f64,
    pub max_memory: f64,
    pub ended_early: bool,
}

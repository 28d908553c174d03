//! Profiling sessions
//!
//! A session owns its sample buffer, phase segmenter, anomaly classifier,
//! wait-for graph, and alert list; there is no cross-session state and no
//! process-wide singletons. The registry creates sessions, routes the
//! pipeline operations, and fans shutdown out to the sampling loops.
//!
//! Concurrency discipline: the sampling loop is the single writer appending
//! to the buffer; the segmenter and classifier are independent consumers
//! that each keep a cursor and catch up when queried, so a slow consumer
//! never stalls the producer. Lock events serialize on one mutex around the
//! holder/waiter map, and deadlock analysis always re-derives from a
//! snapshot of that map.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::anomaly::AnomalyClassifier;
use crate::collector::{SampleSource, SamplingConfig, SamplingLoop, Target};
use crate::deadlock::{detect_cycles, HeuristicBands, RiskAssessor, WaitGraphBuilder};
use crate::models::{
    AnomalyAlert, DeadlockReport, LockEvent, PhaseSegment, Sample, SessionSummary, ThreadCensus,
};
use crate::observability::PipelineMetrics;
use crate::phase::{classify, PhaseSegmenter};

pub type SessionId = u64;

/// Rejected requests. Everything else the pipeline encounters is handled
/// locally and reported, never surfaced as an error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("target cannot be observed: {0}")]
    InvalidTarget(String),
    #[error("sampling interval must be positive, got {0}")]
    InvalidInterval(f64),
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

/// Segmenter plus its read cursor over the session buffer.
struct SegmenterState {
    segmenter: PhaseSegmenter,
    cursor: usize,
}

/// State owned by one profiling session.
pub struct SessionContext {
    id: SessionId,
    target: Target,
    samples: RwLock<Vec<Sample>>,
    segmenter: Mutex<SegmenterState>,
    classifier: Mutex<AnomalyClassifier>,
    graph: Mutex<WaitGraphBuilder>,
    census: RwLock<Option<ThreadCensus>>,
    assessor: RiskAssessor,
    metrics: PipelineMetrics,
    ended: AtomicBool,
    ended_early: AtomicBool,
}

impl SessionContext {
    fn new(
        id: SessionId,
        target: Target,
        classifier: AnomalyClassifier,
        bands: HeuristicBands,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            id,
            target,
            samples: RwLock::new(Vec::new()),
            segmenter: Mutex::new(SegmenterState {
                segmenter: PhaseSegmenter::new(),
                cursor: 0,
            }),
            classifier: Mutex::new(classifier),
            graph: Mutex::new(WaitGraphBuilder::new()),
            census: RwLock::new(None),
            assessor: RiskAssessor::new(bands),
            metrics,
            ended: AtomicBool::new(false),
            ended_early: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Append one sample. A no-op once the session has ended.
    pub fn push_sample(&self, mut sample: Sample) {
        if self.is_ended() {
            debug!(session_id = self.id, "Sample after session end dropped");
            return;
        }
        sample.phase = Some(classify(&sample));
        self.samples
            .write()
            .expect("sample buffer lock poisoned")
            .push(sample);
        self.metrics.inc_samples_ingested();
    }

    /// Fold one lock event into the wait-for graph. A no-op once the
    /// session has ended.
    pub fn push_lock_event(&self, event: &LockEvent) {
        if self.is_ended() {
            debug!(session_id = self.id, "Lock event after session end dropped");
            return;
        }
        self.graph
            .lock()
            .expect("graph lock poisoned")
            .record_event(event);
    }

    /// Latest thread census from the collector, for the heuristic path.
    pub fn update_census(&self, census: ThreadCensus) {
        if self.is_ended() {
            return;
        }
        *self.census.write().expect("census lock poisoned") = Some(census);
    }

    /// Ordered phase segments covering the sampled timeline so far.
    pub fn get_phases(&self) -> Vec<PhaseSegment> {
        let mut state = self.segmenter.lock().expect("segmenter lock poisoned");
        let samples = self.samples.read().expect("sample buffer lock poisoned");
        while state.cursor < samples.len() {
            let sample = samples[state.cursor].clone();
            state.cursor += 1;
            state.segmenter.observe(&sample);
        }
        state.segmenter.segments()
    }

    /// Accumulated anomaly alerts, driving the classifier over any samples
    /// it has not yet seen.
    pub fn get_alerts(&self) -> Vec<AnomalyAlert> {
        let mut classifier = self.classifier.lock().expect("classifier lock poisoned");
        let samples = self.samples.read().expect("sample buffer lock poisoned");
        let before = classifier.alerts().len();
        classifier.catch_up(&samples);
        let emitted = classifier.alerts().len() - before;
        for alert in &classifier.alerts()[before..] {
            self.metrics.inc_alerts_emitted(alert.anomaly_type);
        }
        if emitted > 0 {
            debug!(session_id = self.id, new_alerts = emitted, "Alerts emitted");
        }
        classifier.alerts().to_vec()
    }

    /// True once a scorer error forced the rule-based fallback.
    pub fn using_fallback_classifier(&self) -> bool {
        self.classifier
            .lock()
            .expect("classifier lock poisoned")
            .using_fallback_classifier()
    }

    /// Deadlock analysis, recomputed fresh from the current wait state.
    ///
    /// With lock events recorded the result is graph-backed and includes
    /// renderable nodes/edges; otherwise it degrades to the thread-census
    /// heuristic and the two are distinguishable by `analysis.mode`.
    pub fn get_deadlock_analysis(&self) -> DeadlockReport {
        let (snapshot, locks_tracked) = {
            let graph = self.graph.lock().expect("graph lock poisoned");
            if graph.has_events() {
                (Some(graph.snapshot()), graph.locks_tracked())
            } else {
                (None, graph.locks_tracked())
            }
        };
        self.metrics.inc_analyses_run();

        match snapshot {
            Some(graph) => {
                let cycles = detect_cycles(&graph);
                if !cycles.is_empty() {
                    self.metrics.add_cycles_found(cycles.len());
                }
                let analysis = self.assessor.assess(&graph, &cycles, locks_tracked);
                DeadlockReport {
                    analysis,
                    nodes: graph.render_nodes(),
                    edges: graph.render_edges(),
                    cycles,
                }
            }
            None => {
                let census = self
                    .census
                    .read()
                    .expect("census lock poisoned")
                    .unwrap_or_default();
                let analysis = self.assessor.assess_census(census, locks_tracked);
                DeadlockReport {
                    analysis,
                    cycles: Vec::new(),
                    nodes: Vec::new(),
                    edges: Vec::new(),
                }
            }
        }
    }

    /// End the session: freeze the buffer, close the open segment at the
    /// last received sample, and return the aggregate summary. Idempotent.
    pub fn stop(&self) -> SessionSummary {
        let first_stop = !self.ended.swap(true, Ordering::SeqCst);

        {
            let mut state = self.segmenter.lock().expect("segmenter lock poisoned");
            let samples = self.samples.read().expect("sample buffer lock poisoned");
            while state.cursor < samples.len() {
                let sample = samples[state.cursor].clone();
                state.cursor += 1;
                state.segmenter.observe(&sample);
            }
            if first_stop {
                state.segmenter.finalize();
            }
        }
        {
            let mut classifier = self.classifier.lock().expect("classifier lock poisoned");
            let samples = self.samples.read().expect("sample buffer lock poisoned");
            classifier.catch_up(&samples);
        }

        if first_stop {
            info!(session_id = self.id, target = %self.target, "Session stopped");
        }
        self.summary()
    }

    /// End the session because the source became unreadable. Reported in
    /// the summary, never fatal.
    pub fn mark_ended_early(&self) {
        self.ended_early.store(true, Ordering::SeqCst);
        self.stop();
    }

    fn summary(&self) -> SessionSummary {
        let samples = self.samples.read().expect("sample buffer lock poisoned");
        let sample_count = samples.len();
        let duration = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        };

        let mut avg_cpu = 0.0;
        let mut max_cpu = 0.0f64;
        let mut avg_memory = 0.0;
        let mut max_memory = 0.0f64;
        if sample_count > 0 {
            for sample in samples.iter() {
                avg_cpu += sample.cpu_percent;
                max_cpu = max_cpu.max(sample.cpu_percent);
                avg_memory += sample.memory_percent;
                max_memory = max_memory.max(sample.memory_percent);
            }
            avg_cpu /= sample_count as f64;
            avg_memory /= sample_count as f64;
        }

        SessionSummary {
            sample_count,
            duration,
            avg_cpu,
            max_cpu,
            avg_memory,
            max_memory,
            ended_early: self.ended_early.load(Ordering::SeqCst),
        }
    }
}

/// Creates sessions and routes pipeline operations to them.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionContext>>,
    next_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    bands: HeuristicBands,
    metrics: PipelineMetrics,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(8);
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(0),
            shutdown_tx,
            bands: HeuristicBands::default(),
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn with_bands(mut self, bands: HeuristicBands) -> Self {
        self.bands = bands;
        self
    }

    /// Begin a session. With a source, a sampling loop is spawned; without
    /// one, the session is fed externally through `push_sample`.
    ///
    /// The classifier passed in was selected for this session (rule-based
    /// or model-backed) and is held for the session's lifetime.
    pub async fn start_session(
        &self,
        target: Target,
        interval_secs: f64,
        duration_secs: f64,
        source: Option<Arc<dyn SampleSource>>,
        classifier: AnomalyClassifier,
    ) -> Result<SessionId, SessionError> {
        if interval_secs <= 0.0 {
            return Err(SessionError::InvalidInterval(interval_secs));
        }
        if let Some(source) = &source {
            source
                .probe()
                .await
                .map_err(|e| SessionError::InvalidTarget(e.to_string()))?;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let context = Arc::new(SessionContext::new(
            id,
            target,
            classifier,
            self.bands.clone(),
            self.metrics.clone(),
        ));
        self.sessions.insert(id, context.clone());
        self.metrics.set_sessions_active(self.active_sessions() as i64);
        info!(session_id = id, target = %target, interval_secs, duration_secs, "Session started");

        if let Some(source) = source {
            let config = SamplingConfig {
                interval: Duration::from_secs_f64(interval_secs),
                duration: Duration::from_secs_f64(duration_secs),
            };
            let sampling = SamplingLoop::new(source, context, config);
            tokio::spawn(sampling.run(self.shutdown_tx.subscribe()));
        }

        Ok(id)
    }

    pub fn session(&self, id: SessionId) -> Result<Arc<SessionContext>, SessionError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::UnknownSession(id))
    }

    pub fn push_sample(&self, id: SessionId, sample: Sample) -> Result<(), SessionError> {
        self.session(id)?.push_sample(sample);
        Ok(())
    }

    pub fn push_lock_event(&self, id: SessionId, event: &LockEvent) -> Result<(), SessionError> {
        self.session(id)?.push_lock_event(event);
        Ok(())
    }

    pub fn get_phases(&self, id: SessionId) -> Result<Vec<PhaseSegment>, SessionError> {
        Ok(self.session(id)?.get_phases())
    }

    pub fn get_deadlock_analysis(&self, id: SessionId) -> Result<DeadlockReport, SessionError> {
        Ok(self.session(id)?.get_deadlock_analysis())
    }

    pub fn get_alerts(&self, id: SessionId) -> Result<Vec<AnomalyAlert>, SessionError> {
        Ok(self.session(id)?.get_alerts())
    }

    pub fn stop_session(&self, id: SessionId) -> Result<SessionSummary, SessionError> {
        let summary = self.session(id)?.stop();
        self.metrics.set_sessions_active(self.active_sessions() as i64);
        Ok(summary)
    }

    /// Sessions still accepting samples.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_ended())
            .count()
    }

    /// Signal every sampling loop to stop and finalize.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisMode, AnomalyType, LockAction, PhaseType, RiskLevel};

    fn sample(timestamp: f64, cpu: f64, mem: f64) -> Sample {
        Sample {
            timestamp,
            cpu_percent: cpu,
            memory_percent: mem,
            memory_used_gb: mem / 12.0,
            disk_read_mb: 0.0,
            disk_write_mb: 0.0,
            network_sent_mb: 0.0,
            network_recv_mb: 0.0,
            phase: None,
        }
    }

    fn lock_event(thread_id: u64, lock_id: &str, action: LockAction, timestamp: f64) -> LockEvent {
        LockEvent {
            thread_id,
            lock_id: lock_id.to_string(),
            action,
            timestamp,
        }
    }

    async fn push_session(registry: &SessionRegistry) -> SessionId {
        registry
            .start_session(
                Target::Host,
                1.0,
                60.0,
                None,
                AnomalyClassifier::rule_based(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_non_positive_interval_rejected() {
        let registry = SessionRegistry::new();
        let result = registry
            .start_session(
                Target::Host,
                0.0,
                60.0,
                None,
                AnomalyClassifier::rule_based(),
            )
            .await;
        assert!(matches!(result, Err(SessionError::InvalidInterval(_))));
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get_phases(42),
            Err(SessionError::UnknownSession(42))
        ));
    }

    #[tokio::test]
    async fn test_rising_cpu_end_to_end() {
        let registry = SessionRegistry::new();
        let id = push_session(&registry).await;

        // cpu rises linearly 20 -> 95 over ten one-second samples.
        for i in 0..10 {
            registry
                .push_sample(id, sample(i as f64, 20.0 + 8.4 * i as f64, 30.0))
                .unwrap();
        }

        let phases = registry.get_phases(id).unwrap();
        assert!(phases.len() >= 2);
        assert_ne!(phases[0].phase, PhaseType::CpuBound);
        assert_eq!(phases.last().unwrap().phase, PhaseType::CpuBound);
        // Contiguous coverage of the timeline.
        assert_eq!(phases.first().unwrap().start, 0.0);
        assert_eq!(phases.last().unwrap().end, 9.0);

        let alerts = registry.get_alerts(id).unwrap();
        assert!(alerts
            .iter()
            .any(|a| a.anomaly_type == AnomalyType::CryptoMining));
    }

    #[tokio::test]
    async fn test_stop_finalizes_at_last_sample() {
        let registry = SessionRegistry::new();
        let id = push_session(&registry).await;

        registry.push_sample(id, sample(0.0, 10.0, 20.0)).unwrap();
        registry.push_sample(id, sample(1.0, 12.0, 20.0)).unwrap();
        registry.push_sample(id, sample(2.0, 11.0, 20.0)).unwrap();

        let summary = registry.stop_session(id).unwrap();
        assert_eq!(summary.sample_count, 3);
        assert_eq!(summary.duration, 2.0);
        assert!(!summary.ended_early);

        let phases = registry.get_phases(id).unwrap();
        assert_eq!(phases.last().unwrap().end, 2.0);

        // Pushes after stop are no-ops, not errors.
        registry.push_sample(id, sample(3.0, 90.0, 20.0)).unwrap();
        assert_eq!(registry.stop_session(id).unwrap().sample_count, 3);
    }

    #[tokio::test]
    async fn test_deadlock_analysis_graph_mode() {
        let registry = SessionRegistry::new();
        let id = push_session(&registry).await;

        registry
            .push_lock_event(id, &lock_event(1, "a", LockAction::Acquire, 0.0))
            .unwrap();
        registry
            .push_lock_event(id, &lock_event(2, "b", LockAction::Acquire, 1.0))
            .unwrap();
        registry
            .push_lock_event(id, &lock_event(1, "b", LockAction::WaitStart, 2.0))
            .unwrap();
        registry
            .push_lock_event(id, &lock_event(2, "a", LockAction::WaitStart, 3.0))
            .unwrap();

        let report = registry.get_deadlock_analysis(id).unwrap();
        assert_eq!(report.analysis.mode, AnalysisMode::WaitForGraph);
        assert!(report.analysis.has_cycles);
        assert_eq!(report.analysis.risk_level, RiskLevel::High);
        assert_eq!(report.analysis.total_locks_tracked, 2);
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.edges.len(), 2);

        // Idempotent with no intervening lock events.
        let again = registry.get_deadlock_analysis(id).unwrap();
        assert_eq!(
            serde_json::to_value(&again.analysis).unwrap(),
            serde_json::to_value(&report.analysis).unwrap()
        );
    }

    #[tokio::test]
    async fn test_deadlock_analysis_census_mode() {
        let registry = SessionRegistry::new();
        let id = push_session(&registry).await;

        let context = registry.session(id).unwrap();
        context.update_census(ThreadCensus {
            thread_count: 8,
            waiting_threads: 6,
        });

        let report = registry.get_deadlock_analysis(id).unwrap();
        assert_eq!(report.analysis.mode, AnalysisMode::ThreadCensus);
        assert!(!report.analysis.has_cycles);
        assert_eq!(report.analysis.risk_level, RiskLevel::Medium);
        assert!(report.nodes.is_empty());
        assert!(report.edges.is_empty());
    }

    #[tokio::test]
    async fn test_summary_aggregates() {
        let registry = SessionRegistry::new();
        let id = push_session(&registry).await;

        registry.push_sample(id, sample(0.0, 40.0, 50.0)).unwrap();
        registry.push_sample(id, sample(1.0, 60.0, 70.0)).unwrap();

        let summary = registry.stop_session(id).unwrap();
        assert!((summary.avg_cpu - 50.0).abs() < 1e-9);
        assert_eq!(summary.max_cpu, 60.0);
        assert!((summary.avg_memory - 60.0).abs() < 1e-9);
        assert_eq!(summary.max_memory, 70.0);
        assert_eq!(registry.active_sessions(), 0);
    }
}

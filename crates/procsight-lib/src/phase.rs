//! Phase classification and timeline segmentation
//!
//! Classifies each sample into a behavioral phase and folds runs of
//! same-typed samples into segments with aggregate statistics. Aggregates
//! are maintained as running sums so segmentation is a single pass over the
//! sample stream.

use crate::models::{PhaseSegment, PhaseType, Sample};

/// CPU percentage above which a sample is CPU-bound.
pub const CPU_THRESHOLD: f64 = 70.0;

/// Memory percentage above which a sample is memory-bound.
pub const MEMORY_THRESHOLD: f64 = 70.0;

/// Combined disk read+write MB rate above which a sample is I/O-bound.
pub const IO_THRESHOLD: f64 = 50.0;

/// CPU percentage below which an otherwise-unclassified sample is idle.
pub const IDLE_CPU_THRESHOLD: f64 = 30.0;

/// Classify one sample into a phase type.
///
/// The precedence is fixed: CPU, then memory, then I/O, then idle, then
/// mixed. More than one threshold can be satisfied at once; the first match
/// wins.
pub fn classify(sample: &Sample) -> PhaseType {
    if sample.cpu_percent > CPU_THRESHOLD {
        PhaseType::CpuBound
    } else if sample.memory_percent > MEMORY_THRESHOLD {
        PhaseType::MemoryBound
    } else if sample.io_rate_mb() > IO_THRESHOLD {
        PhaseType::IoBound
    } else if sample.cpu_percent < IDLE_CPU_THRESHOLD {
        PhaseType::Idle
    } else {
        PhaseType::Mixed
    }
}

/// Running aggregates for the segment currently being extended.
#[derive(Debug, Clone)]
struct OpenSegment {
    phase: PhaseType,
    start: f64,
    end: f64,
    cpu_sum: f64,
    cpu_max: f64,
    mem_sum: f64,
    mem_max: f64,
    io_sum: f64,
    sample_count: usize,
}

impl OpenSegment {
    fn begin(phase: PhaseType, sample: &Sample) -> Self {
        Self {
            phase,
            start: sample.timestamp,
            end: sample.timestamp,
            cpu_sum: sample.cpu_percent,
            cpu_max: sample.cpu_percent,
            mem_sum: sample.memory_percent,
            mem_max: sample.memory_percent,
            io_sum: sample.io_rate_mb(),
            sample_count: 1,
        }
    }

    fn extend(&mut self, sample: &Sample) {
        self.end = sample.timestamp;
        self.cpu_sum += sample.cpu_percent;
        self.cpu_max = self.cpu_max.max(sample.cpu_percent);
        self.mem_sum += sample.memory_percent;
        self.mem_max = self.mem_max.max(sample.memory_percent);
        self.io_sum += sample.io_rate_mb();
        self.sample_count += 1;
    }

    /// Close the segment at the given boundary: the next segment's start on
    /// a transition, or the last received sample at finalize.
    fn close_at(&self, end: f64) -> PhaseSegment {
        let n = self.sample_count as f64;
        PhaseSegment {
            start: self.start,
            end,
            phase: self.phase,
            duration: end - self.start,
            avg_cpu: self.cpu_sum / n,
            max_cpu: self.cpu_max,
            avg_memory: self.mem_sum / n,
            max_memory: self.mem_max,
            avg_io_mb: self.io_sum / n,
            sample_count: self.sample_count,
        }
    }
}

/// Incremental timeline segmenter.
///
/// Consumes samples one at a time in timestamp order, extending the current
/// segment while the classified type is unchanged and closing it on the
/// first sample whose type differs. The open segment is closed at the last
/// received sample when the session stops, never at an assumed future time.
#[derive(Debug, Default)]
pub struct PhaseSegmenter {
    closed: Vec<PhaseSegment>,
    current: Option<OpenSegment>,
}

impl PhaseSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next sample, returning its classified phase.
    ///
    /// A type transition closes the current segment at the new sample's
    /// timestamp, so consecutive segments always share a boundary.
    pub fn observe(&mut self, sample: &Sample) -> PhaseType {
        let phase = classify(sample);
        match self.current.as_mut() {
            Some(open) if open.phase == phase => open.extend(sample),
            Some(open) => {
                self.closed.push(open.close_at(sample.timestamp));
                self.current = Some(OpenSegment::begin(phase, sample));
            }
            None => self.current = Some(OpenSegment::begin(phase, sample)),
        }
        phase
    }

    /// Close the open segment at its last received sample.
    pub fn finalize(&mut self) {
        if let Some(open) = self.current.take() {
            self.closed.push(open.close_at(open.end));
        }
    }

    /// Closed segments plus a snapshot of the open one.
    ///
    /// The snapshot ends at the last observed sample, so the returned list
    /// always covers exactly the sampled timeline.
    pub fn segments(&self) -> Vec<PhaseSegment> {
        let mut segments = self.closed.clone();
        if let Some(open) = &self.current {
            segments.push(open.close_at(open.end));
        }
        segments
    }
}

/// Segment a complete sample sequence in one pass.
pub fn segment(samples: &[Sample]) -> Vec<PhaseSegment> {
    let mut segmenter = PhaseSegmenter::new();
    for sample in samples {
        segmenter.observe(sample);
    }
    segmenter.finalize();
    segmenter.segments()
}

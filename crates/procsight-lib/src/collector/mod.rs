//! Sample collection from the host
//!
//! This module provides the sample source abstraction and its Linux procfs
//! implementation, plus the fixed-interval loop that feeds a profiling
//! session. A source observes either one target process or the whole host.

mod procfs;
mod r#loop;


pub use procfs::ProcfsSampleSource;
pub use r#loop::{SamplingConfig, SamplingLoop};

use crate::models::{Sample, ThreadCensus};
use anyhow::Result;
use std::sync::Arc;

pub use async_trait::async_trait;

/// What a session observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Whole-host metrics.
    Host,
    /// One process by pid.
    Process(i32),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Host => write!(f, "host"),
            Target::Process(pid) => write!(f, "pid {pid}"),
        }
    }
}

/// Trait for sample source implementations.
///
/// One sample per tick; the source never blocks on downstream consumers.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Check that the target can be observed at all.
    async fn probe(&self) -> Result<()>;

    /// Take one measurement, stamped with seconds since session start.
    async fn sample(&self, timestamp: f64) -> Result<Sample>;

    /// Count the target's threads and how many sit in waiting-like states.
    /// Feeds the heuristic deadlock path when no lock events are wired.
    async fn thread_census(&self) -> Result<ThreadCensus>;
}

/// Create the default procfs-backed source for a target.
pub fn create_source(target: Target) -> Arc<dyn SampleSource> {
    Arc::new(ProcfsSampleSource::new(target))
}

//! Sampling loop
//!
//! Drives one profiling session: takes a sample from the source on a fixed
//! interval and appends it to the session buffer. The loop is the single
//! producer; it never waits on the segmenter or classifier, which catch up
//! on their own cursors. The loop ends on duration expiry, shutdown, or a
//! source failure (which marks the session ended early).

use super::SampleSource;
use crate::observability::PipelineMetrics;
use crate::session::SessionContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

/// Configuration for the sampling loop.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Time between samples.
    pub interval: Duration,
    /// Total session length.
    pub duration: Duration,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            duration: Duration::from_secs(60),
        }
    }
}

/// Fixed-interval producer feeding one session.
pub struct SamplingLoop {
    source: Arc<dyn SampleSource>,
    session: Arc<SessionContext>,
    config: SamplingConfig,
    metrics: PipelineMetrics,
}

impl SamplingLoop {
    pub fn new(
        source: Arc<dyn SampleSource>,
        session: Arc<SessionContext>,
        config: SamplingConfig,
    ) -> Self {
        Self {
            source,
            session,
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Run until the session duration elapses, the source fails, or
    /// shutdown is signalled.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            session_id = self.session.id(),
            interval_ms = self.config.interval.as_millis() as u64,
            duration_secs = self.config.duration.as_secs(),
            "Starting sampling loop"
        );

        let started = Instant::now();
        let mut ticker = interval(self.config.interval);
        let mut tick_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if started.elapsed() >= self.config.duration {
                        info!(session_id = self.session.id(), "Session duration reached");
                        self.session.stop();
                        break;
                    }

                    let timestamp = started.elapsed().as_secs_f64();
                    match self.source.sample(timestamp).await {
                        Ok(sample) => self.session.push_sample(sample),
                        Err(error) => {
                            // The target went away or became unreadable:
                            // finalize with what we have, never fatal.
                            warn!(
                                session_id = self.session.id(),
                                error = %error,
                                "Sample source failed, ending session early"
                            );
                            self.metrics.inc_collection_errors();
                            self.session.mark_ended_early();
                            break;
                        }
                    }

                    match self.source.thread_census().await {
                        Ok(census) => self.session.update_census(census),
                        Err(error) => {
                            debug!(
                                session_id = self.session.id(),
                                error = %error,
                                "Thread census unavailable this tick"
                            );
                        }
                    }

                    tick_count += 1;
                    if tick_count % 30 == 0 {
                        debug!(
                            session_id = self.session.id(),
                            samples = tick_count,
                            "Sampling progress"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!(session_id = self.session.id(), "Shutting down sampling loop");
                    self.session.stop();
                    break;
                }
            }
        }
    }
}

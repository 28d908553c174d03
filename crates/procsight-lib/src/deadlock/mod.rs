//! Deadlock-risk analysis
//!
//! This module provides:
//! - A wait-for graph builder fed by lock acquire/release/wait events
//! - Cycle detection over graph snapshots (circular waits)
//! - Risk assessment, with a thread-census heuristic fallback when the
//!   target carries no lock instrumentation

mod cycles;
mod graph;
mod risk;

pub use cycles::detect_cycles;
pub use graph::{WaitForGraph, WaitGraphBuilder};
pub use risk::{HeuristicBands, RiskAssessor};

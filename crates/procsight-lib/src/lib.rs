//! Pipeline library for process profiling
//!
//! This crate provides the core functionality for:
//! - Sample collection from procfs
//! - Phase classification and timeline segmentation
//! - Deadlock-risk analysis from lock wait-for graphs
//! - Anomaly classification with pluggable scorers
//! - Health checks and observability

pub mod anomaly;
pub mod collector;
pub mod deadlock;
pub mod health;
pub mod models;
pub mod observability;
pub mod phase;
pub mod session;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::PipelineMetrics;
pub use session::{SessionContext, SessionError, SessionId, SessionRegistry};

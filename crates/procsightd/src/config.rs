//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// API server port for sessions, health, and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Default sampling interval in seconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: f64,

    /// Default session duration in seconds
    #[serde(default = "default_session_duration")]
    pub session_duration_secs: f64,

    /// Optional ONNX anomaly model path; absent means rule-based scoring
    #[serde(default)]
    pub model_path: Option<String>,
}

fn default_api_port() -> u16 {
    8080
}

fn default_sample_interval() -> f64 {
    1.0
}

fn default_session_duration() -> f64 {
    60.0
}

impl DaemonConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PROCSIGHT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| DaemonConfig {
            api_port: default_api_port(),
            sample_interval_secs: default_sample_interval(),
            session_duration_secs: default_session_duration(),
            model_path: None,
        }))
    }
}

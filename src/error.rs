use thiserror::Error;

use crate::models::Environment;
use crate::pipeline::release::ReleasePhase;

#[derive(Error, Debug)]
pub enum ShipgateError {
    #[error("Gate rejected deployment to {environment}: {}", reasons.join("; "))]
    GateRejected {
        environment: String,
        reasons: Vec<String>,
    },

    #[error("Build failed for service '{service}': {reason}")]
    Build { service: String, reason: String },

    #[error("Service '{service}' not healthy after {attempts} attempts: {last_status}")]
    HealthCheckTimeout {
        service: String,
        attempts: u32,
        last_status: String,
    },

    #[error("Slot swap failed for service '{service}': {reason}")]
    SwapFailed { service: String, reason: String },

    #[error("Infrastructure API error: {0}")]
    InfraApi(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("Deployment to {0} was not approved")]
    ApprovalDenied(Environment),

    #[error("Approval for deployment to {0} timed out")]
    ApprovalTimeout(Environment),

    #[error("Invalid release transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ReleasePhase, to: ReleasePhase },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShipgateError {
    /// Transient cloud-API failures are the only errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::InfraApi(_))
    }
}

pub type Result<T> = std::result::Result<T, ShipgateError>;

//! Configuration for a pipeline run.
//!
//! Loaded from `shipgate.toml` when present. Every section is optional and
//! falls back to built-in defaults; tokens never live here and come from the
//! CLI or environment instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipgateError};
use crate::models::Environment;
use crate::pipeline::gate::PolicySet;
use crate::pipeline::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "shipgate.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub policies: PolicySet,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub approval: ApprovalConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub azure: AzureConfig,

    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_registry")]
    pub registry: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_health_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default = "default_infra_retries")]
    pub max_retries: u32,
    #[serde(default = "default_infra_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// `None` waits for a reviewer indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_approval_poll_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// `owner/name`; falls back to `GITHUB_REPOSITORY` on the command line.
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default = "default_status_context")]
    pub status_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    #[serde(default = "default_management_url")]
    pub management_url: String,
    #[serde(default)]
    pub subscription_id: String,
    /// Resource group name; `{env}` expands to the environment short name.
    #[serde(default = "default_resource_group")]
    pub resource_group: String,
    #[serde(default = "default_slot")]
    pub slot: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Base URL template for slot health endpoints. `{app}` and `{slot}`
    /// expand to the site and slot names.
    #[serde(default = "default_slot_url")]
    pub slot_url: String,
    /// Interval between polls of an accepted slot swap.
    #[serde(default = "default_operation_poll_ms")]
    pub operation_poll_ms: u64,
}

/// A deployable service: where to build it and where it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub context: PathBuf,
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,
    /// App Service site name; `{env}` expands to the environment short name.
    pub app: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl ServiceSpec {
    pub fn app_name(&self, environment: Environment) -> String {
        self.app.replace("{env}", environment.short_name())
    }
}

impl Config {
    /// Load `path`, or `shipgate.toml` in the working directory when no path
    /// is given. A missing default file yields the built-in defaults; a
    /// missing explicit file is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !explicit && !tokio::fs::try_exists(&path).await? {
            debug!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(&path).await?;
        let config = Self::from_toml(&contents)?;
        info!(
            "Loaded configuration from {} ({} services)",
            path.display(),
            config.services.len()
        );
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                return Err(ShipgateError::Config("Service name is empty".to_string()));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(ShipgateError::Config(format!(
                    "Service '{}' is declared more than once",
                    service.name
                )));
            }
        }

        if self.build.max_workers == 0 {
            return Err(ShipgateError::Config(
                "build.max_workers must be at least 1".to_string(),
            ));
        }
        if self.health_check.max_attempts == 0 {
            return Err(ShipgateError::Config(
                "health_check.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }
}

impl InfraConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ApprovalConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl AzureConfig {
    pub fn resource_group(&self, environment: Environment) -> String {
        self.resource_group.replace("{env}", environment.short_name())
    }

    pub fn slot_base_url(&self, app: &str) -> String {
        self.slot_url.replace("{app}", app).replace("{slot}", &self.slot)
    }

    pub fn operation_poll(&self) -> Duration {
        Duration::from_millis(self.operation_poll_ms)
    }
}

// Default implementations

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            max_workers: default_max_workers(),
        }
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_health_attempts(),
            interval_ms: default_health_interval_ms(),
            latency_budget_ms: default_latency_budget_ms(),
        }
    }
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            max_retries: default_infra_retries(),
            backoff_ms: default_infra_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            poll_interval_secs: default_approval_poll_secs(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            repository: None,
            status_context: default_status_context(),
        }
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            management_url: default_management_url(),
            subscription_id: String::new(),
            resource_group: default_resource_group(),
            slot: default_slot(),
            api_version: default_api_version(),
            slot_url: default_slot_url(),
            operation_poll_ms: default_operation_poll_ms(),
        }
    }
}

// Default value functions for serde

fn default_registry() -> String {
    "localhost:5000".to_string()
}

fn default_max_workers() -> usize {
    4
}

fn default_health_attempts() -> u32 {
    10
}

fn default_health_interval_ms() -> u64 {
    15_000
}

fn default_latency_budget_ms() -> u64 {
    2_000
}

fn default_infra_retries() -> u32 {
    3
}

fn default_infra_backoff_ms() -> u64 {
    5_000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_approval_poll_secs() -> u64 {
    30
}

fn default_github_api_url() -> String {
    "https://api.github.com/".to_string()
}

fn default_status_context() -> String {
    "shipgate".to_string()
}

fn default_management_url() -> String {
    "https://management.azure.com/".to_string()
}

fn default_resource_group() -> String {
    "rg-agency-{env}".to_string()
}

fn default_slot() -> String {
    "staging".to_string()
}

fn default_api_version() -> String {
    "2022-03-01".to_string()
}

fn default_slot_url() -> String {
    "https://{app}-{slot}.azurewebsites.net".to_string()
}

fn default_operation_poll_ms() -> u64 {
    5000
}

fn default_health_path() -> String {
    "/health".to_string()
}

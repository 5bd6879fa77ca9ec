pub mod azure;
pub mod docker;
#[cfg(test)]
pub mod fake;
pub mod github;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ServiceSpec;
use crate::error::Result;
use crate::models::{DeploymentRequest, Environment, HealthStatus, ImageRef};

/// Builds images and pushes them to a container registry.
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    async fn build(&self, service: &ServiceSpec, repository: &str, tags: &[String]) -> Result<()>;

    /// Push `repository:tag` and return its content digest.
    async fn push(&self, repository: &str, tag: &str) -> Result<String>;
}

/// The hosting platform's slot-based deployment API.
#[async_trait]
pub trait CloudDeployer: Send + Sync {
    /// Image currently serving traffic, if the service has ever been deployed.
    async fn live_image(
        &self,
        environment: Environment,
        service: &ServiceSpec,
    ) -> Result<Option<ImageRef>>;

    async fn deploy_to_slot(
        &self,
        environment: Environment,
        service: &ServiceSpec,
        image: &ImageRef,
    ) -> Result<()>;

    async fn health_check(
        &self,
        environment: Environment,
        service: &ServiceSpec,
    ) -> Result<HealthStatus>;

    /// Atomically exchange the staging slot with the live slot.
    async fn swap_slots(&self, environment: Environment, service: &ServiceSpec) -> Result<()>;

    /// Point the staging slot back at `previous`, the last known-good image.
    async fn rollback(
        &self,
        environment: Environment,
        service: &ServiceSpec,
        previous: Option<&ImageRef>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Where issues and commit statuses go.
#[async_trait]
pub trait IssueSink: Send + Sync {
    /// Open an issue and return its number.
    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<u64>;

    async fn set_commit_status(
        &self,
        sha: &str,
        state: CommitState,
        context: &str,
        description: &str,
    ) -> Result<()>;
}

/// Blocks until a human approves or denies a deployment.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request_approval(&self, request: &DeploymentRequest) -> Result<bool>;

    /// Withdraw a request the caller stopped waiting on.
    async fn cancel(&self, _request: &DeploymentRequest, _reason: &str) {}
}

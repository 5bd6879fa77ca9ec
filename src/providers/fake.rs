//! In-memory collaborators for tests.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ApprovalGate, CloudDeployer, CommitState, ContainerRegistry, IssueSink};
use crate::config::ServiceSpec;
use crate::error::{Result, ShipgateError};
use crate::models::{DeploymentRequest, Environment, HealthStatus, ImageRef};

pub fn service(name: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        context: PathBuf::from(format!("packages/{name}")),
        dockerfile: None,
        app: format!("app-{name}-{{env}}"),
        health_path: "/health".to_string(),
    }
}

#[derive(Default)]
pub struct FakeRegistry {
    fail_on: Option<String>,
    pushed: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn failing_on(service: &str) -> Self {
        Self {
            fail_on: Some(service.to_string()),
            pushed: Mutex::default(),
        }
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRegistry for FakeRegistry {
    async fn build(&self, service: &ServiceSpec, _repository: &str, _tags: &[String]) -> Result<()> {
        if self.fail_on.as_deref() == Some(service.name.as_str()) {
            return Err(ShipgateError::Build {
                service: service.name.clone(),
                reason: "docker build exited with status 1".to_string(),
            });
        }
        Ok(())
    }

    async fn push(&self, repository: &str, tag: &str) -> Result<String> {
        let reference = format!("{repository}:{tag}");
        let mut hasher = DefaultHasher::new();
        reference.hash(&mut hasher);
        self.pushed.lock().unwrap().push(reference);
        Ok(format!("sha256:{:016x}", hasher.finish()))
    }
}

pub enum HealthScript {
    Healthy,
    Timeout,
    Slow(Duration),
    HealthyAfter(u32),
    UnhealthyService(String),
}

#[derive(Default)]
struct CloudState {
    live: HashMap<String, ImageRef>,
    slot: HashMap<String, ImageRef>,
    health_checks: HashMap<String, u32>,
    calls: Vec<String>,
    failing_deploys: u32,
    failing_swap: Option<String>,
    swaps_in_flight: u32,
    max_swaps_in_flight: u32,
}

pub struct FakeCloud {
    script: HealthScript,
    swap_delay: Duration,
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new(script: HealthScript) -> Self {
        Self {
            script,
            swap_delay: Duration::ZERO,
            state: Mutex::default(),
        }
    }

    pub fn with_swap_delay(mut self, delay: Duration) -> Self {
        self.swap_delay = delay;
        self
    }

    pub fn set_live(&self, service: &str, image: ImageRef) {
        self.state
            .lock()
            .unwrap()
            .live
            .insert(service.to_string(), image);
    }

    pub fn fail_deploys(&self, count: u32) {
        self.state.lock().unwrap().failing_deploys = count;
    }

    /// Make every swap of `service` fail.
    pub fn fail_swaps_of(&self, service: &str) {
        self.state.lock().unwrap().failing_swap = Some(service.to_string());
    }

    pub fn live(&self, service: &str) -> Option<ImageRef> {
        self.state.lock().unwrap().live.get(service).cloned()
    }

    pub fn slot(&self, service: &str) -> Option<ImageRef> {
        self.state.lock().unwrap().slot.get(service).cloned()
    }

    pub fn health_checks(&self, service: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .health_checks
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn max_concurrent_swaps(&self) -> u32 {
        self.state.lock().unwrap().max_swaps_in_flight
    }
}

#[async_trait]
impl CloudDeployer for FakeCloud {
    async fn live_image(
        &self,
        environment: Environment,
        service: &ServiceSpec,
    ) -> Result<Option<ImageRef>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("live {} {environment}", service.name));
        Ok(state.live.get(&service.name).cloned())
    }

    async fn deploy_to_slot(
        &self,
        _environment: Environment,
        service: &ServiceSpec,
        image: &ImageRef,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("deploy {}", service.name));
        if state.failing_deploys > 0 {
            state.failing_deploys -= 1;
            return Err(ShipgateError::InfraApi("503 Service Unavailable".to_string()));
        }
        state.slot.insert(service.name.clone(), image.clone());
        Ok(())
    }

    async fn health_check(
        &self,
        _environment: Environment,
        service: &ServiceSpec,
    ) -> Result<HealthStatus> {
        let attempt = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("health {}", service.name));
            let count = state.health_checks.entry(service.name.clone()).or_default();
            *count += 1;
            *count
        };

        let fast = Duration::from_millis(20);
        let status = |healthy: bool, latency: Duration| HealthStatus {
            healthy,
            latency,
            detail: if healthy { "healthy" } else { "503 Service Unavailable" }.to_string(),
        };

        match &self.script {
            HealthScript::Healthy => Ok(status(true, fast)),
            HealthScript::Timeout => Err(ShipgateError::InfraApi(
                "health check timed out".to_string(),
            )),
            HealthScript::Slow(latency) => Ok(status(true, *latency)),
            HealthScript::HealthyAfter(failures) => Ok(status(attempt > *failures, fast)),
            HealthScript::UnhealthyService(name) => Ok(status(&service.name != name, fast)),
        }
    }

    async fn swap_slots(&self, _environment: Environment, service: &ServiceSpec) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("swap {}", service.name));
            if state.failing_swap.as_deref() == Some(service.name.as_str()) {
                return Err(ShipgateError::InfraApi("409 Conflict".to_string()));
            }
            state.swaps_in_flight += 1;
            state.max_swaps_in_flight = state.max_swaps_in_flight.max(state.swaps_in_flight);
        }

        if !self.swap_delay.is_zero() {
            tokio::time::sleep(self.swap_delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.swaps_in_flight -= 1;
        let staged = state.slot.remove(&service.name);
        let live = state.live.remove(&service.name);
        if let Some(image) = staged {
            state.live.insert(service.name.clone(), image);
        }
        if let Some(image) = live {
            state.slot.insert(service.name.clone(), image);
        }
        Ok(())
    }

    async fn rollback(
        &self,
        _environment: Environment,
        service: &ServiceSpec,
        previous: Option<&ImageRef>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rollback {}", service.name));
        match previous {
            Some(image) => state.slot.insert(service.name.clone(), image.clone()),
            None => state.slot.remove(&service.name),
        };
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Default)]
pub struct RecordingSink {
    fail: bool,
    issues: Mutex<Vec<RecordedIssue>>,
    statuses: Mutex<Vec<(String, CommitState, String)>>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn issues(&self) -> Vec<RecordedIssue> {
        self.issues.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, CommitState, String)> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueSink for RecordingSink {
    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<u64> {
        if self.fail {
            return Err(ShipgateError::Api("401 Unauthorized".to_string()));
        }
        let mut issues = self.issues.lock().unwrap();
        issues.push(RecordedIssue {
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.to_vec(),
        });
        Ok(issues.len() as u64)
    }

    async fn set_commit_status(
        &self,
        sha: &str,
        state: CommitState,
        _context: &str,
        description: &str,
    ) -> Result<()> {
        if self.fail {
            return Err(ShipgateError::Api("401 Unauthorized".to_string()));
        }
        self.statuses
            .lock()
            .unwrap()
            .push((sha.to_string(), state, description.to_string()));
        Ok(())
    }
}

pub enum StaticApproval {
    Approve,
    Deny,
    Never,
}

#[async_trait]
impl ApprovalGate for StaticApproval {
    async fn request_approval(&self, _request: &DeploymentRequest) -> Result<bool> {
        match self {
            Self::Approve => Ok(true),
            Self::Deny => Ok(false),
            Self::Never => {
                std::future::pending::<()>().await;
                Ok(false)
            }
        }
    }
}

/// A `StaticApproval` that remembers which requests were cancelled.
pub struct RecordingApproval {
    answer: StaticApproval,
    cancelled: Mutex<Vec<String>>,
}

impl RecordingApproval {
    pub fn new(answer: StaticApproval) -> Self {
        Self {
            answer,
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApprovalGate for RecordingApproval {
    async fn request_approval(&self, request: &DeploymentRequest) -> Result<bool> {
        self.answer.request_approval(request).await
    }

    async fn cancel(&self, request: &DeploymentRequest, _reason: &str) {
        self.cancelled
            .lock()
            .unwrap()
            .push(request.commit_sha.clone());
    }
}

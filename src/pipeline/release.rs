//! Blue-green release state machine.
//!
//! A release builds images, deploys them to each service's staging slot,
//! waits for every slot to report healthy and only then swaps slots. A slot
//! that never becomes healthy is pointed back at the previous known-good image
//! and the live slot is left untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{HealthCheckConfig, ServiceSpec};
use crate::error::{Result, ShipgateError};
use crate::models::{Environment, ImageRef};
use crate::pipeline::build::BuildCoordinator;
use crate::pipeline::retry::{with_retries, RetryPolicy};
use crate::providers::CloudDeployer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleasePhase {
    Building,
    DeployingToSlot,
    HealthChecking,
    Swapping,
    Live,
    RollingBack,
    Failed,
}

impl ReleasePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Live | Self::Failed)
    }

    pub fn can_transition_to(self, next: ReleasePhase) -> bool {
        use ReleasePhase::*;

        match self {
            Building => matches!(next, DeployingToSlot | Failed),
            DeployingToSlot => matches!(next, HealthChecking | Failed),
            HealthChecking => matches!(next, Swapping | RollingBack),
            Swapping => matches!(next, Live | Failed),
            RollingBack => matches!(next, Failed),
            Live | Failed => false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseState {
    pub commit_sha: String,
    pub environment: Environment,
    pub phase: ReleasePhase,
    pub image_refs: IndexMap<String, ImageRef>,
    /// Image each service was serving before this release touched it.
    pub previous_images: IndexMap<String, Option<ImageRef>>,
    pub history: Vec<ReleasePhase>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub rollback_errors: Vec<String>,
    /// The error that failed the release, kept typed for the caller.
    #[serde(skip)]
    pub cause: Option<ShipgateError>,
}

impl ReleaseState {
    pub fn new(commit_sha: &str, environment: Environment) -> Self {
        Self {
            commit_sha: commit_sha.to_string(),
            environment,
            phase: ReleasePhase::Building,
            image_refs: IndexMap::new(),
            previous_images: IndexMap::new(),
            history: vec![ReleasePhase::Building],
            started_at: Utc::now(),
            finished_at: None,
            last_error: None,
            rollback_errors: Vec::new(),
            cause: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.phase == ReleasePhase::Live
    }

    fn advance(&mut self, next: ReleasePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ShipgateError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }

        info!(
            "Release {} to {}: {:?} -> {:?}",
            self.commit_sha, self.environment, self.phase, next
        );
        self.phase = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn record_error(&mut self, err: ShipgateError) {
        error!(
            "Release {} to {} failed during {:?}: {err}",
            self.commit_sha, self.environment, self.phase
        );
        self.last_error = Some(err.to_string());
        self.cause = Some(err);
    }
}

pub struct ReleaseController {
    builder: BuildCoordinator,
    cloud: Arc<dyn CloudDeployer>,
    health: HealthCheckConfig,
    retry: RetryPolicy,
}

impl ReleaseController {
    pub fn new(
        builder: BuildCoordinator,
        cloud: Arc<dyn CloudDeployer>,
        health: HealthCheckConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            builder,
            cloud,
            health,
            retry,
        }
    }

    /// Drive a release from `Building` to `Live` or `Failed`.
    pub async fn run(
        &self,
        commit_sha: &str,
        environment: Environment,
        services: &[ServiceSpec],
    ) -> ReleaseState {
        let mut state = ReleaseState::new(commit_sha, environment);

        while !state.phase.is_terminal() {
            let next = self.step(&mut state, services).await;
            if let Err(e) = state.advance(next) {
                state.record_error(e);
                state.phase = ReleasePhase::Failed;
                state.history.push(ReleasePhase::Failed);
                state.finished_at = Some(Utc::now());
            }
        }

        state
    }

    async fn step(&self, state: &mut ReleaseState, services: &[ServiceSpec]) -> ReleasePhase {
        match state.phase {
            ReleasePhase::Building => {
                match self
                    .builder
                    .build_and_push(&state.commit_sha, state.environment, services)
                    .await
                {
                    Ok(images) => {
                        state.image_refs = images;
                        ReleasePhase::DeployingToSlot
                    }
                    Err(e) => {
                        state.record_error(e);
                        ReleasePhase::Failed
                    }
                }
            }
            ReleasePhase::DeployingToSlot => match self.deploy_slots(state, services).await {
                Ok(()) => ReleasePhase::HealthChecking,
                Err(e) => {
                    state.record_error(e);
                    ReleasePhase::Failed
                }
            },
            ReleasePhase::HealthChecking => {
                match self.check_health(state.environment, services).await {
                    Ok(()) => ReleasePhase::Swapping,
                    Err(e) => {
                        state.record_error(e);
                        ReleasePhase::RollingBack
                    }
                }
            }
            ReleasePhase::Swapping => match self.swap(state, services).await {
                Ok(()) => ReleasePhase::Live,
                Err(e) => {
                    state.record_error(e);
                    ReleasePhase::Failed
                }
            },
            ReleasePhase::RollingBack => {
                self.roll_back(state, services).await;
                ReleasePhase::Failed
            }
            terminal @ (ReleasePhase::Live | ReleasePhase::Failed) => terminal,
        }
    }

    async fn deploy_slots(&self, state: &mut ReleaseState, services: &[ServiceSpec]) -> Result<()> {
        let environment = state.environment;

        for service in services {
            let previous = with_retries(self.retry, "live image lookup", || {
                self.cloud.live_image(environment, service)
            })
            .await?;
            debug!(
                "Service '{}' currently serving {}",
                service.name,
                previous
                    .as_ref()
                    .map_or_else(|| "nothing".to_string(), ToString::to_string)
            );
            state.previous_images.insert(service.name.clone(), previous);
        }

        for service in services {
            let image = state.image_refs.get(&service.name).ok_or_else(|| {
                ShipgateError::Config(format!("No image built for service '{}'", service.name))
            })?;

            info!("Deploying {image} to the staging slot of '{}'", service.name);
            with_retries(self.retry, "slot deploy", || {
                self.cloud.deploy_to_slot(environment, service, image)
            })
            .await?;
        }

        Ok(())
    }

    async fn check_health(&self, environment: Environment, services: &[ServiceSpec]) -> Result<()> {
        for service in services {
            self.wait_until_healthy(environment, service).await?;
        }
        Ok(())
    }

    async fn wait_until_healthy(&self, environment: Environment, service: &ServiceSpec) -> Result<()> {
        let budget = self.health.latency_budget();
        let attempts = self.health.max_attempts;
        let mut last_status = String::from("no response");

        for attempt in 1..=attempts {
            match self.cloud.health_check(environment, service).await {
                Ok(status) if status.healthy && status.latency <= budget => {
                    info!(
                        "Service '{}' healthy after {attempt} attempt(s) ({:?})",
                        service.name, status.latency
                    );
                    return Ok(());
                }
                Ok(status) if status.healthy => {
                    last_status = format!(
                        "responded in {:?}, over the {:?} budget",
                        status.latency, budget
                    );
                }
                Ok(status) => last_status = status.detail,
                Err(e) => last_status = e.to_string(),
            }

            warn!(
                "Health check {attempt}/{attempts} for '{}' failed: {last_status}",
                service.name
            );
            if attempt < attempts {
                tokio::time::sleep(self.health.interval()).await;
            }
        }

        Err(ShipgateError::HealthCheckTimeout {
            service: service.name.clone(),
            attempts,
            last_status,
        })
    }

    /// Swap services one by one. If a swap fails, the services already
    /// swapped are swapped back so the previous release stays live as a set.
    async fn swap(&self, state: &mut ReleaseState, services: &[ServiceSpec]) -> Result<()> {
        let environment = state.environment;
        let mut swapped: Vec<&ServiceSpec> = Vec::new();

        for service in services {
            if let Err(e) = self.cloud.swap_slots(environment, service).await {
                if !swapped.is_empty() {
                    warn!(
                        "Swap of '{}' failed, swapping {} service(s) back",
                        service.name,
                        swapped.len()
                    );
                    self.unswap(state, &swapped).await;
                }
                return Err(ShipgateError::SwapFailed {
                    service: service.name.clone(),
                    reason: e.to_string(),
                });
            }
            info!("Swapped '{}' into the live slot", service.name);
            swapped.push(service);
        }

        Ok(())
    }

    async fn unswap(&self, state: &mut ReleaseState, swapped: &[&ServiceSpec]) {
        let environment = state.environment;

        for &service in swapped.iter().rev() {
            let result = with_retries(self.retry, "swap back", || {
                self.cloud.swap_slots(environment, service)
            })
            .await;

            match result {
                Ok(()) => info!("Swapped '{}' back to its previous release", service.name),
                Err(e) => {
                    error!("Swapping '{}' back failed: {e}", service.name);
                    state
                        .rollback_errors
                        .push(format!("{}: {e}", service.name));
                }
            }
        }
    }

    async fn roll_back(&self, state: &mut ReleaseState, services: &[ServiceSpec]) {
        let environment = state.environment;

        for service in services {
            let Some(previous) = state.previous_images.get(&service.name) else {
                continue;
            };

            let result = with_retries(self.retry, "rollback", || {
                self.cloud.rollback(environment, service, previous.as_ref())
            })
            .await;

            match result {
                Ok(()) => info!("Rolled back the staging slot of '{}'", service.name),
                Err(e) => {
                    error!("Rollback of '{}' failed: {e}", service.name);
                    state
                        .rollback_errors
                        .push(format!("{}: {e}", service.name));
                }
            }
        }
    }
}

/// Swap every service's slots again, putting the previous release back live.
///
/// Used after a failed or regretted promotion. Services are attempted in
/// order; the first failure stops the swap-back and is returned.
pub async fn swap_back(
    cloud: &dyn CloudDeployer,
    retry: RetryPolicy,
    environment: Environment,
    services: &[ServiceSpec],
) -> Result<()> {
    for service in services {
        with_retries(retry, "swap back", || cloud.swap_slots(environment, service))
            .await
            .map_err(|e| ShipgateError::SwapFailed {
                service: service.name.clone(),
                reason: e.to_string(),
            })?;
        info!("Swapped '{}' back to its previous release", service.name);
    }
    Ok(())
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{Config, ServiceSpec};
use crate::error::{Result, ShipgateError};
use crate::models::{AnalysisReport, DeploymentRequest, Environment, TriggerEvent};
use crate::pipeline::build::BuildCoordinator;
use crate::pipeline::flags::parse_target;
use crate::pipeline::gate::{evaluate, GateDecision, PolicySet};
use crate::pipeline::notify::{Event, Notifier};
use crate::pipeline::release::{ReleaseController, ReleaseState};
use crate::pipeline::scoring::compute_scores;
use crate::providers::{ApprovalGate, CloudDeployer, ContainerRegistry, IssueSink};

/// External systems a pipeline run talks to.
pub struct Collaborators {
    pub registry: Arc<dyn ContainerRegistry>,
    pub cloud: Arc<dyn CloudDeployer>,
    pub issues: Arc<dyn IssueSink>,
    pub approval: Arc<dyn ApprovalGate>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No deployment flag: scores are reported, nothing is deployed.
    ReviewOnly { request: DeploymentRequest },
    Rejected {
        request: DeploymentRequest,
        environment: Environment,
        decision: GateDecision,
    },
    Released {
        request: DeploymentRequest,
        state: ReleaseState,
    },
}

impl RunOutcome {
    /// The error a caller should surface, if the run did not succeed.
    pub fn into_failure(self) -> Option<ShipgateError> {
        match self {
            Self::ReviewOnly { .. } => None,
            Self::Rejected {
                environment,
                decision,
                ..
            } => Some(ShipgateError::GateRejected {
                environment: environment.to_string(),
                reasons: decision.reasons,
            }),
            Self::Released { state, .. } if state.is_live() => None,
            Self::Released { state, .. } => Some(state.cause.unwrap_or_else(|| {
                ShipgateError::Api(format!(
                    "release to {} ended in {:?}",
                    state.environment, state.phase
                ))
            })),
        }
    }
}

/// Runs triggers through the gate and, when approved, the release.
///
/// At most one release per environment is in flight; later triggers for the
/// same environment wait their turn.
pub struct Engine {
    policies: PolicySet,
    services: Vec<ServiceSpec>,
    controller: ReleaseController,
    notifier: Notifier,
    approval: Arc<dyn ApprovalGate>,
    approval_timeout: Option<Duration>,
    locks: HashMap<Environment, Mutex<()>>,
}

impl Engine {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let builder = BuildCoordinator::new(collaborators.registry, config.build.clone());
        let controller = ReleaseController::new(
            builder,
            collaborators.cloud,
            config.health_check.clone(),
            config.infra.retry_policy(),
        );

        Self {
            policies: config.policies.clone(),
            services: config.services.clone(),
            controller,
            notifier: Notifier::new(collaborators.issues, config.github.status_context.clone()),
            approval: collaborators.approval,
            approval_timeout: config.approval.timeout(),
            locks: Environment::ALL
                .into_iter()
                .map(|env| (env, Mutex::new(())))
                .collect(),
        }
    }

    pub async fn run(&self, trigger: &TriggerEvent, report: &AnalysisReport) -> RunOutcome {
        let target = parse_target(&trigger.commit_message);
        let request = DeploymentRequest {
            commit_sha: trigger.commit_sha.clone(),
            target_environment: target,
            score_pair: compute_scores(report),
        };

        info!(
            "Commit {} on {}: quality {}, security {}",
            trigger.commit_sha, trigger.branch, request.score_pair.quality, request.score_pair.security
        );

        let Some(environment) = target else {
            info!("No deployment flag in commit message, review only");
            return RunOutcome::ReviewOnly { request };
        };

        let policy = self.policies.policy(environment);
        let mut decision = evaluate(&request, policy);

        if decision.approved && policy.requires_approval {
            if let Err(e) = self.await_approval(&request, environment).await {
                decision = GateDecision {
                    approved: false,
                    reasons: vec![e.to_string()],
                };
            }
        }

        if !decision.approved {
            warn!(
                "Deployment to {environment} rejected: {}",
                decision.reasons.join("; ")
            );
            self.notifier
                .report(Event::GateFailure {
                    request: &request,
                    environment,
                    decision: &decision,
                })
                .await;
            return RunOutcome::Rejected {
                request,
                environment,
                decision,
            };
        }

        let _guard = self.lock(environment).await;
        self.notifier.release_started(&request, environment).await;

        let state = self
            .controller
            .run(&request.commit_sha, environment, &self.services)
            .await;

        let event = if state.is_live() {
            Event::ReleaseSuccess {
                request: &request,
                state: &state,
            }
        } else {
            Event::ReleaseFailure {
                request: &request,
                state: &state,
            }
        };
        self.notifier.report(event).await;

        RunOutcome::Released { request, state }
    }

    async fn await_approval(&self, request: &DeploymentRequest, environment: Environment) -> Result<()> {
        info!("Waiting for manual approval to deploy {} to {environment}", request.commit_sha);

        let pending = self.approval.request_approval(request);
        let approved = match self.approval_timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(answer) => answer?,
                Err(_) => {
                    let reason = format!("no decision within {}s", limit.as_secs());
                    self.approval.cancel(request, &reason).await;
                    return Err(ShipgateError::ApprovalTimeout(environment));
                }
            },
            None => pending.await?,
        };

        if approved {
            info!("Deployment to {environment} approved");
            Ok(())
        } else {
            Err(ShipgateError::ApprovalDenied(environment))
        }
    }

    async fn lock(&self, environment: Environment) -> MutexGuard<'_, ()> {
        let lock = &self.locks[&environment];
        if lock.try_lock().is_err() {
            info!("Another release to {environment} is in progress, queueing");
        }
        lock.lock().await
    }
}

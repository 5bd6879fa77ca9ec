use std::fmt::Write;
use std::sync::Arc;

use log::{info, warn};

use crate::models::{DeploymentRequest, Environment};
use crate::pipeline::gate::GateDecision;
use crate::pipeline::release::{ReleasePhase, ReleaseState};
use crate::providers::{CommitState, IssueSink};

/// Longest description the commit status API accepts.
const STATUS_DESCRIPTION_LIMIT: usize = 140;

#[derive(Debug, Clone)]
pub enum Event<'a> {
    GateFailure {
        request: &'a DeploymentRequest,
        environment: Environment,
        decision: &'a GateDecision,
    },
    ReleaseFailure {
        request: &'a DeploymentRequest,
        state: &'a ReleaseState,
    },
    ReleaseSuccess {
        request: &'a DeploymentRequest,
        state: &'a ReleaseState,
    },
}

/// Reports pipeline outcomes as issues and commit statuses.
///
/// Reporting never fails: a decision has already been made by the time we
/// report it, so sink errors are logged and dropped.
pub struct Notifier {
    sink: Arc<dyn IssueSink>,
    context: String,
}

impl Notifier {
    pub fn new(sink: Arc<dyn IssueSink>, context: impl Into<String>) -> Self {
        Self {
            sink,
            context: context.into(),
        }
    }

    pub async fn release_started(&self, request: &DeploymentRequest, environment: Environment) {
        let description = format!("Releasing to {environment}");
        self.status(&request.commit_sha, environment, CommitState::Pending, &description)
            .await;
    }

    pub async fn report(&self, event: Event<'_>) {
        match event {
            Event::GateFailure {
                request,
                environment,
                decision,
            } => {
                let title = format!(
                    "Deployment gate failed: {environment} @ {}",
                    short_sha(&request.commit_sha)
                );
                let body = gate_failure_body(request, environment, decision);
                self.issue(&title, &body, &["deployment", "gate-failure", environment.as_str()])
                    .await;

                let description = format!("Gate failed: {}", decision.reasons.join("; "));
                self.status(&request.commit_sha, environment, CommitState::Failure, &description)
                    .await;
            }
            Event::ReleaseFailure { request, state } => {
                let rolled_back = state.history.contains(&ReleasePhase::RollingBack);
                let failed_at = failed_phase(state);
                let title = format!(
                    "Release to {} failed during {failed_at:?} @ {}",
                    state.environment,
                    short_sha(&state.commit_sha)
                );
                let body = release_failure_body(request, state);
                let kind = if rolled_back { "rollback" } else { "release-failure" };
                self.issue(&title, &body, &["deployment", kind, state.environment.as_str()])
                    .await;

                let description = format!(
                    "Release failed: {}",
                    state.last_error.as_deref().unwrap_or("unknown error")
                );
                self.status(
                    &state.commit_sha,
                    state.environment,
                    CommitState::Failure,
                    &description,
                )
                .await;
            }
            Event::ReleaseSuccess { request, state } => {
                let description = format!(
                    "Live in {} ({} services)",
                    state.environment,
                    state.image_refs.len()
                );
                info!(
                    "Release of {} is live in {}",
                    short_sha(&request.commit_sha),
                    state.environment
                );
                self.status(
                    &state.commit_sha,
                    state.environment,
                    CommitState::Success,
                    &description,
                )
                .await;
            }
        }
    }

    async fn issue(&self, title: &str, body: &str, labels: &[&str]) {
        let labels: Vec<String> = labels.iter().map(|l| (*l).to_string()).collect();
        match self.sink.create_issue(title, body, &labels).await {
            Ok(number) => info!("Opened issue #{number}: {title}"),
            Err(e) => warn!("Could not open issue '{title}': {e}"),
        }
    }

    async fn status(&self, sha: &str, environment: Environment, state: CommitState, description: &str) {
        let context = format!("{}/{}", self.context, environment.short_name());
        let description = truncate(description, STATUS_DESCRIPTION_LIMIT);
        if let Err(e) = self
            .sink
            .set_commit_status(sha, state, &context, &description)
            .await
        {
            warn!("Could not set {state} status on {}: {e}", short_sha(sha));
        }
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit - 3).collect();
    out.push_str("...");
    out
}

/// The phase the release was in when it gave up.
fn failed_phase(state: &ReleaseState) -> ReleasePhase {
    state
        .history
        .iter()
        .rev()
        .find(|p| !matches!(p, ReleasePhase::Failed | ReleasePhase::RollingBack))
        .copied()
        .unwrap_or(ReleasePhase::Building)
}

fn gate_failure_body(
    request: &DeploymentRequest,
    environment: Environment,
    decision: &GateDecision,
) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "## Deployment to {environment} blocked\n");
    let _ = writeln!(body, "- **Commit:** `{}`", request.commit_sha);
    let _ = writeln!(body, "- **Quality score:** {}", request.score_pair.quality);
    let _ = writeln!(body, "- **Security score:** {}", request.score_pair.security);
    let _ = writeln!(body, "\n### Unmet criteria\n");
    for reason in &decision.reasons {
        let _ = writeln!(body, "- {reason}");
    }
    body
}

fn release_failure_body(request: &DeploymentRequest, state: &ReleaseState) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "## Release to {} failed\n", state.environment);
    let _ = writeln!(body, "- **Commit:** `{}`", state.commit_sha);
    let _ = writeln!(
        body,
        "- **Scores:** quality {}, security {}",
        request.score_pair.quality, request.score_pair.security
    );
    let _ = writeln!(body, "- **Started:** {}", state.started_at.to_rfc3339());
    let _ = writeln!(
        body,
        "- **Cause:** {}",
        state.last_error.as_deref().unwrap_or("unknown error")
    );

    let phases: Vec<String> = state.history.iter().map(|p| format!("{p:?}")).collect();
    let _ = writeln!(body, "- **Phases:** {}", phases.join(" → "));

    if !state.image_refs.is_empty() {
        let _ = writeln!(body, "\n### Images\n");
        for (service, image) in &state.image_refs {
            let _ = writeln!(body, "- `{service}`: `{image}`");
        }
    }

    if state.history.contains(&ReleasePhase::RollingBack) {
        let _ = writeln!(body, "\n### Rollback\n");
        if state.rollback_errors.is_empty() {
            let _ = writeln!(body, "Staging slots were restored; the live slot was not changed.");
        } else {
            let _ = writeln!(body, "Rollback was incomplete and needs an operator:\n");
            for err in &state.rollback_errors {
                let _ = writeln!(body, "- {err}");
            }
        }
    } else if state.phase == ReleasePhase::Failed
        && failed_phase(state) == ReleasePhase::Swapping
    {
        let _ = writeln!(body, "\n### Swap\n");
        if state.rollback_errors.is_empty() {
            let _ = writeln!(
                body,
                "Services swapped before the failure were swapped back. If the failed \
                 service was left half-swapped, run `shipgate rollback` for it."
            );
        } else {
            let _ = writeln!(body, "Some services could not be swapped back:\n");
            for err in &state.rollback_errors {
                let _ = writeln!(body, "- {err}");
            }
            let _ = writeln!(body, "\nRun `shipgate rollback` for the services above.");
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScorePair;
    use crate::providers::fake::RecordingSink;

    fn request() -> DeploymentRequest {
        DeploymentRequest {
            commit_sha: "0123456789abcdef".to_string(),
            target_environment: Some(Environment::Production),
            score_pair: ScorePair {
                quality: 80,
                security: 85,
            },
        }
    }

    fn failed_state(history: &[ReleasePhase]) -> ReleaseState {
        let mut state = ReleaseState::new("0123456789abcdef", Environment::Production);
        state.history = history.to_vec();
        state.phase = ReleasePhase::Failed;
        state.last_error = Some("Service 'api' not healthy after 3 attempts".to_string());
        state
    }

    #[tokio::test]
    async fn test_gate_failure_opens_issue_with_every_reason() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), "shipgate");
        let decision = GateDecision {
            approved: false,
            reasons: vec!["quality too low".to_string(), "security too low".to_string()],
        };
        let req = request();

        notifier
            .report(Event::GateFailure {
                request: &req,
                environment: Environment::Production,
                decision: &decision,
            })
            .await;

        let issues = sink.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "Deployment gate failed: production @ 0123456");
        assert!(issues[0].body.contains("quality too low"));
        assert!(issues[0].body.contains("security too low"));
        assert!(issues[0].labels.contains(&"gate-failure".to_string()));

        let statuses = sink.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].1, CommitState::Failure);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_labelled() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), "shipgate");
        let state = failed_state(&[
            ReleasePhase::Building,
            ReleasePhase::DeployingToSlot,
            ReleasePhase::HealthChecking,
            ReleasePhase::RollingBack,
            ReleasePhase::Failed,
        ]);
        let req = request();

        notifier
            .report(Event::ReleaseFailure {
                request: &req,
                state: &state,
            })
            .await;

        let issue = &sink.issues()[0];
        assert!(issue.title.contains("failed during HealthChecking"));
        assert!(issue.labels.contains(&"rollback".to_string()));
        assert!(issue.body.contains("not healthy after 3 attempts"));
        assert!(issue.body.contains("live slot was not changed"));
    }

    #[tokio::test]
    async fn test_swap_failure_points_at_manual_rollback() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), "shipgate");
        let state = failed_state(&[
            ReleasePhase::Building,
            ReleasePhase::DeployingToSlot,
            ReleasePhase::HealthChecking,
            ReleasePhase::Swapping,
            ReleasePhase::Failed,
        ]);
        let req = request();

        notifier
            .report(Event::ReleaseFailure {
                request: &req,
                state: &state,
            })
            .await;

        let issue = &sink.issues()[0];
        assert!(issue.labels.contains(&"release-failure".to_string()));
        assert!(issue.body.contains("shipgate rollback"));
    }

    #[tokio::test]
    async fn test_failed_swap_back_is_listed() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), "shipgate");
        let mut state = failed_state(&[
            ReleasePhase::Building,
            ReleasePhase::DeployingToSlot,
            ReleasePhase::HealthChecking,
            ReleasePhase::Swapping,
            ReleasePhase::Failed,
        ]);
        state.rollback_errors = vec!["api: 409 Conflict".to_string()];
        let req = request();

        notifier
            .report(Event::ReleaseFailure {
                request: &req,
                state: &state,
            })
            .await;

        let issue = &sink.issues()[0];
        assert!(issue.body.contains("could not be swapped back"));
        assert!(issue.body.contains("api: 409 Conflict"));
    }

    #[tokio::test]
    async fn test_success_sets_status_without_issue() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), "shipgate");
        let mut state = ReleaseState::new("0123456789abcdef", Environment::Staging);
        state.phase = ReleasePhase::Live;
        let req = request();

        notifier
            .report(Event::ReleaseSuccess {
                request: &req,
                state: &state,
            })
            .await;

        assert!(sink.issues().is_empty());
        let statuses = sink.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].1, CommitState::Success);
    }

    #[tokio::test]
    async fn test_sink_errors_are_swallowed() {
        let notifier = Notifier::new(Arc::new(RecordingSink::failing()), "shipgate");
        let decision = GateDecision {
            approved: false,
            reasons: vec!["quality too low".to_string()],
        };
        let req = request();

        notifier
            .report(Event::GateFailure {
                request: &req,
                environment: Environment::Staging,
                decision: &decision,
            })
            .await;
        notifier.release_started(&req, Environment::Staging).await;
    }

    #[test]
    fn test_long_descriptions_are_truncated() {
        let long = "x".repeat(300);

        let truncated = truncate(&long, STATUS_DESCRIPTION_LIMIT);

        assert_eq!(truncated.chars().count(), STATUS_DESCRIPTION_LIMIT);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate("short", STATUS_DESCRIPTION_LIMIT), "short");
    }

    #[test]
    fn test_short_sha_handles_short_input() {
        assert_eq!(short_sha("abc"), "abc");
        assert_eq!(short_sha("0123456789"), "0123456");
    }
}

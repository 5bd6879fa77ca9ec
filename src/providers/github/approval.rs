use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::GitHubClient;
use crate::error::Result;
use crate::models::DeploymentRequest;
use crate::pipeline::retry::{with_retries, RetryPolicy};
use crate::providers::{ApprovalGate, IssueSink};

pub const APPROVAL_REQUEST_LABEL: &str = "deployment-approval";
pub const APPROVED_LABEL: &str = "approved";

/// Human approval through a GitHub issue.
///
/// Adding the `approved` label approves the release. Closing the issue
/// without it denies the release. An issue whose request is abandoned, by
/// a lookup error or by [`ApprovalGate::cancel`], is commented on and closed.
pub struct GitHubApproval {
    client: Arc<GitHubClient>,
    poll_interval: Duration,
    retry: RetryPolicy,
    /// Open approval issues by commit SHA.
    pending: Mutex<HashMap<String, u64>>,
}

impl GitHubApproval {
    pub fn new(client: Arc<GitHubClient>, poll_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            poll_interval,
            retry,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn track(&self, sha: &str, number: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(sha.to_string(), number);
        }
    }

    fn untrack(&self, sha: &str) -> Option<u64> {
        self.pending.lock().ok()?.remove(sha)
    }

    async fn poll(&self, number: u64) -> Result<bool> {
        loop {
            let issue = with_retries(self.retry, "approval lookup", || {
                self.client.fetch_issue(number)
            })
            .await?;
            if issue.labels.iter().any(|l| l.name == APPROVED_LABEL) {
                info!("Issue #{number} approved");
                return Ok(true);
            }
            if issue.state == "closed" {
                info!("Issue #{number} closed without approval");
                return Ok(false);
            }
            debug!("Issue #{number} still pending");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Best effort: a failure here only leaves the issue open.
    async fn withdraw(&self, number: u64, reason: &str) {
        let body = format!("Approval request withdrawn: {reason}");
        if let Err(e) = self.client.comment_on_issue(number, &body).await {
            warn!("Could not comment on approval issue #{number}: {e}");
        }
        match self.client.close_issue(number).await {
            Ok(()) => info!("Closed approval issue #{number}"),
            Err(e) => warn!("Could not close approval issue #{number}: {e}"),
        }
    }
}

#[async_trait]
impl ApprovalGate for GitHubApproval {
    async fn request_approval(&self, request: &DeploymentRequest) -> Result<bool> {
        let environment = request
            .target_environment
            .map_or_else(|| "review".to_string(), |env| env.to_string());
        let title = format!(
            "Approve deployment of {} to {environment}",
            request.commit_sha
        );
        let body = format!(
            "Quality score: {}\nSecurity score: {}\n\nAdd the `{APPROVED_LABEL}` label to approve, \
             or close this issue to deny.",
            request.score_pair.quality, request.score_pair.security
        );

        let number = self
            .client
            .create_issue(&title, &body, &[APPROVAL_REQUEST_LABEL.to_string()])
            .await?;
        self.track(&request.commit_sha, number);
        info!("Waiting for approval on issue #{number}");

        let result = self.poll(number).await;
        self.untrack(&request.commit_sha);
        if let Err(e) = &result {
            self.withdraw(number, &e.to_string()).await;
        }
        result
    }

    async fn cancel(&self, request: &DeploymentRequest, reason: &str) {
        match self.untrack(&request.commit_sha) {
            Some(number) => self.withdraw(number, reason).await,
            None => debug!("No open approval issue for {}", request.commit_sha),
        }
    }
}

use serde::Deserialize;

use crate::error::{Result, ShipgateError};
use crate::models::TriggerEvent;

#[derive(Debug, Deserialize)]
struct PushPayload {
    after: Option<String>,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    head_commit: Option<HeadCommit>,
    pull_request: Option<PullRequest>,
}

#[derive(Debug, Deserialize)]
struct HeadCommit {
    id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    head: PullRequestHead,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestHead {
    sha: String,
    #[serde(rename = "ref")]
    git_ref: String,
}

/// Read a webhook payload from `GITHUB_EVENT_PATH` into a [`TriggerEvent`].
///
/// Push events carry the flag-bearing commit message in `head_commit`.
/// Pull request events use the PR title as the message.
pub fn trigger_from_push_event(payload: &str) -> Result<TriggerEvent> {
    let payload: PushPayload = serde_json::from_str(payload)?;

    if let Some(pr) = payload.pull_request {
        return Ok(TriggerEvent {
            commit_sha: pr.head.sha,
            commit_message: pr.title,
            branch: pr.head.git_ref,
            event_type: "pull_request".to_string(),
        });
    }

    let branch = payload
        .git_ref
        .as_deref()
        .map(|r| r.strip_prefix("refs/heads/").unwrap_or(r).to_string())
        .unwrap_or_default();

    match (payload.head_commit, payload.after) {
        (Some(commit), _) => Ok(TriggerEvent {
            commit_sha: commit.id,
            commit_message: commit.message,
            branch,
            event_type: "push".to_string(),
        }),
        (None, Some(after)) => Ok(TriggerEvent {
            commit_sha: after,
            commit_message: String::new(),
            branch,
            event_type: "push".to_string(),
        }),
        (None, None) => Err(ShipgateError::Config(
            "Event payload has no commit to deploy".to_string(),
        )),
    }
}

mod approval;
mod client;
mod event;

pub use approval::GitHubApproval;
pub use client::GitHubClient;
pub use event::trigger_from_push_event;

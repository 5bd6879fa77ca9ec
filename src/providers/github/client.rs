use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Token;
use crate::error::{Result, ShipgateError};
use crate::providers::{CommitState, IssueSink};

pub struct GitHubClient {
    client: Client,
    api_url: Url,
    repository: String,
    token: Option<Token>,
}

#[derive(Debug, Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    body: &'a str,
    labels: &'a [String],
}

#[derive(Debug, Serialize)]
struct NewStatus<'a> {
    state: CommitState,
    context: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct NewComment<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct IssueUpdate<'a> {
    state: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct IssueDto {
    pub number: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub labels: Vec<LabelDto>,
}

#[derive(Debug, Deserialize)]
pub struct LabelDto {
    pub name: String,
}

impl GitHubClient {
    pub fn new(
        base_url: &str,
        repository: &str,
        token: Option<Token>,
        timeout: Duration,
    ) -> Result<Self> {
        if repository.split('/').filter(|p| !p.is_empty()).count() != 2 {
            return Err(ShipgateError::Config(format!(
                "GitHub repository must be 'owner/name', got '{repository}'"
            )));
        }

        let client = Client::builder()
            .user_agent(concat!("shipgate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ShipgateError::Config(format!("Failed to create HTTP client: {e}")))?;

        let api_url = Url::parse(&with_trailing_slash(base_url))
            .map_err(|e| ShipgateError::Config(format!("Invalid GitHub API URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            repository: repository.to_string(),
            token,
        })
    }

    fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    fn repo_url(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(&format!("repos/{}/{path}", self.repository))
            .map_err(|e| ShipgateError::Config(format!("Invalid repository URL: {e}")))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .auth_request(request)
            .send()
            .await
            .map_err(|e| ShipgateError::InfraApi(format!("GitHub request failed: {e}")))?;
        check(response).await
    }

    pub async fn fetch_issue(&self, number: u64) -> Result<IssueDto> {
        let url = self.repo_url(&format!("issues/{number}"))?;
        let issue = self.send(self.client.get(url)).await?.json::<IssueDto>().await?;
        Ok(issue)
    }

    pub async fn comment_on_issue(&self, number: u64, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("issues/{number}/comments"))?;
        self.send(self.client.post(url).json(&NewComment { body }))
            .await?;
        Ok(())
    }

    pub async fn close_issue(&self, number: u64) -> Result<()> {
        let url = self.repo_url(&format!("issues/{number}"))?;
        self.send(self.client.patch(url).json(&IssueUpdate { state: "closed" }))
            .await?;
        debug!("Closed issue #{number} in {}", self.repository);
        Ok(())
    }
}

#[async_trait]
impl IssueSink for GitHubClient {
    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<u64> {
        let url = self.repo_url("issues")?;
        let request = self
            .client
            .post(url)
            .json(&NewIssue { title, body, labels });

        let issue = self.send(request).await?.json::<IssueDto>().await?;
        debug!("Created issue #{} in {}", issue.number, self.repository);
        Ok(issue.number)
    }

    async fn set_commit_status(
        &self,
        sha: &str,
        state: CommitState,
        context: &str,
        description: &str,
    ) -> Result<()> {
        let url = self.repo_url(&format!("statuses/{sha}"))?;
        let request = self.client.post(url).json(&NewStatus {
            state,
            context,
            description,
        });

        self.send(request).await?;
        Ok(())
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("GitHub returned {status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(ShipgateError::InfraApi(message))
    } else {
        Err(ShipgateError::Api(message))
    }
}

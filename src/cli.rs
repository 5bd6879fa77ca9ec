use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis;
use crate::auth::Token;
use crate::config::{Config, ServiceSpec};
use crate::models::{DeploymentRequest, Environment, TriggerEvent};
use crate::pipeline::flags::parse_target;
use crate::pipeline::gate::evaluate;
use crate::pipeline::release::swap_back;
use crate::pipeline::scoring::compute_scores;
use crate::pipeline::{Collaborators, Engine};
use crate::providers::azure::AppServiceClient;
use crate::providers::docker::DockerRegistry;
use crate::providers::github::{trigger_from_push_event, GitHubApproval, GitHubClient};

#[derive(Parser)]
#[command(name = "shipgate")]
#[command(author, version, about = "Quality-gated blue-green deployments", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output file path (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty print JSON output
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,

    /// Configuration file (defaults to ./shipgate.toml when present)
    #[arg(short, long, global = true, env = "SHIPGATE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute quality and security scores from analysis reports
    Score {
        /// Directory holding the analysis tools' JSON outputs
        #[arg(short, long, default_value = "reports")]
        reports_dir: PathBuf,

        /// Number of lines changed by the commit
        #[arg(long)]
        changed_lines: Option<u32>,
    },
    /// Print the environment a commit message asks to deploy to
    Target {
        /// Commit message to scan for [dev], [staging] or [prod]
        #[arg(short, long)]
        message: String,
    },
    /// Evaluate the quality gate without deploying
    Gate {
        #[arg(short, long)]
        message: String,

        #[arg(short, long, env = "GITHUB_SHA")]
        sha: String,

        #[arg(short, long, default_value = "reports")]
        reports_dir: PathBuf,

        #[arg(long)]
        changed_lines: Option<u32>,
    },
    /// Run the full pipeline: gate, build, release
    Deploy {
        /// Webhook payload to read the commit from
        #[arg(short, long, env = "GITHUB_EVENT_PATH")]
        event: Option<PathBuf>,

        /// Commit SHA (when no event payload is given)
        #[arg(short, long)]
        sha: Option<String>,

        /// Commit message (when no event payload is given)
        #[arg(short, long)]
        message: Option<String>,

        #[arg(short, long, env = "GITHUB_REF_NAME", default_value = "main")]
        branch: String,

        #[arg(short, long, default_value = "reports")]
        reports_dir: PathBuf,

        #[arg(long)]
        changed_lines: Option<u32>,

        /// GitHub token for issues, statuses and approvals
        #[arg(long, env = "GITHUB_TOKEN")]
        github_token: Option<String>,

        /// Repository as "owner/name"
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repository: Option<String>,

        /// Azure Resource Manager access token
        #[arg(long, env = "AZURE_ACCESS_TOKEN")]
        azure_token: Option<String>,
    },
    /// Swap slots back, restoring the previous release
    Rollback {
        /// Environment to roll back
        #[arg(short, long)]
        environment: Environment,

        /// Only roll back this service (defaults to every configured service)
        #[arg(short = 'S', long)]
        service: Option<String>,

        #[arg(long, env = "AZURE_ACCESS_TOKEN")]
        azure_token: Option<String>,
    },
}

#[derive(Serialize)]
struct TargetOutput {
    target: Option<Environment>,
}

#[derive(Serialize)]
struct GateOutput {
    request: DeploymentRequest,
    approved: bool,
    requires_approval: bool,
    reasons: Vec<String>,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Score {
                reports_dir,
                changed_lines,
            } => {
                let report = analysis::collect(reports_dir, *changed_lines).await;
                let scores = compute_scores(&report);
                info!("Quality {}, security {}", scores.quality, scores.security);
                self.write(&scores)
            }
            Commands::Target { message } => self.write(&TargetOutput {
                target: parse_target(message),
            }),
            Commands::Gate {
                message,
                sha,
                reports_dir,
                changed_lines,
            } => {
                let config = Config::load(self.config.as_deref()).await?;
                let report = analysis::collect(reports_dir, *changed_lines).await;
                let request = DeploymentRequest {
                    commit_sha: sha.clone(),
                    target_environment: parse_target(message),
                    score_pair: compute_scores(&report),
                };

                let Some(environment) = request.target_environment else {
                    info!("No deployment flag, nothing to gate");
                    return self.write(&GateOutput {
                        request,
                        approved: false,
                        requires_approval: false,
                        reasons: Vec::new(),
                    });
                };

                let policy = config.policies.policy(environment);
                let decision = evaluate(&request, policy);
                let approved = decision.approved;
                self.write(&GateOutput {
                    request,
                    approved,
                    requires_approval: policy.requires_approval,
                    reasons: decision.reasons.clone(),
                })?;

                if !approved {
                    bail!(crate::error::ShipgateError::GateRejected {
                        environment: environment.to_string(),
                        reasons: decision.reasons,
                    });
                }
                Ok(())
            }
            Commands::Deploy {
                event,
                sha,
                message,
                branch,
                reports_dir,
                changed_lines,
                github_token,
                repository,
                azure_token,
            } => {
                let config = Config::load(self.config.as_deref()).await?;
                let trigger = read_trigger(event.as_deref(), sha, message, branch).await?;
                info!("Running pipeline for {} on {}", trigger.commit_sha, trigger.branch);

                let repository = resolve_repository(
                    repository.as_deref(),
                    config.github.repository.as_deref(),
                )
                .context("No GitHub repository: set github.repository or GITHUB_REPOSITORY")?;
                let github = Arc::new(GitHubClient::new(
                    &config.github.api_url,
                    &repository,
                    Token::non_empty(github_token.as_deref()),
                    config.infra.request_timeout(),
                )?);
                let cloud = AppServiceClient::new(
                    config.azure.clone(),
                    Token::non_empty(azure_token.as_deref()),
                    config.infra.request_timeout(),
                )?;

                let collaborators = Collaborators {
                    registry: Arc::new(DockerRegistry::new()),
                    cloud: Arc::new(cloud),
                    issues: github.clone(),
                    approval: Arc::new(GitHubApproval::new(
                        github,
                        config.approval.poll_interval(),
                        config.infra.retry_policy(),
                    )),
                };

                let report = analysis::collect(reports_dir, *changed_lines).await;
                let engine = Engine::new(&config, collaborators);
                let outcome = engine.run(&trigger, &report).await;
                self.write(&outcome)?;

                match outcome.into_failure() {
                    Some(e) => Err(e.into()),
                    None => Ok(()),
                }
            }
            Commands::Rollback {
                environment,
                service,
                azure_token,
            } => {
                let config = Config::load(self.config.as_deref()).await?;
                let services = select_services(&config.services, service.as_deref())?;
                let cloud = AppServiceClient::new(
                    config.azure.clone(),
                    Token::non_empty(azure_token.as_deref()),
                    config.infra.request_timeout(),
                )?;

                info!(
                    "Rolling back {} service(s) in {environment}",
                    services.len()
                );
                swap_back(&cloud, config.infra.retry_policy(), *environment, &services).await?;
                Ok(())
            }
        }
    }

    fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        let json_output = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{}", json_output);
        }

        Ok(())
    }
}

async fn read_trigger(
    event: Option<&Path>,
    sha: &Option<String>,
    message: &Option<String>,
    branch: &str,
) -> Result<TriggerEvent> {
    if let (Some(sha), Some(message)) = (sha, message) {
        return Ok(TriggerEvent {
            commit_sha: sha.clone(),
            commit_message: message.clone(),
            branch: branch.to_string(),
            event_type: "manual".to_string(),
        });
    }

    let Some(path) = event else {
        bail!("Pass --sha and --message, or --event with a webhook payload");
    };
    let payload = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read event payload {}", path.display()))?;
    Ok(trigger_from_push_event(&payload)?)
}

/// The command line (or `GITHUB_REPOSITORY`) wins over the config file.
fn resolve_repository(cli: Option<&str>, config: Option<&str>) -> Option<String> {
    cli.or(config).map(str::to_string)
}

fn select_services(services: &[ServiceSpec], only: Option<&str>) -> Result<Vec<ServiceSpec>> {
    let selected: Vec<ServiceSpec> = match only {
        Some(name) => services.iter().filter(|s| s.name == name).cloned().collect(),
        None => services.to_vec(),
    };

    if selected.is_empty() {
        match only {
            Some(name) => bail!("Service '{name}' is not configured"),
            None => bail!("No services are configured"),
        }
    }
    Ok(selected)
}

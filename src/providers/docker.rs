use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use crate::config::ServiceSpec;
use crate::error::{Result, ShipgateError};
use crate::providers::ContainerRegistry;

/// Builds and pushes images with the local `docker` CLI.
pub struct DockerRegistry {
    program: PathBuf,
}

impl DockerRegistry {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, subject: &str, args: &[String]) -> Result<String> {
        debug!("Running {} {}", self.program.display(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ShipgateError::Build {
                service: subject.to_string(),
                reason: format!("could not run {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ShipgateError::Build {
                service: subject.to_string(),
                reason: format!(
                    "`{} {}` exited with {}: {}",
                    self.program.display(),
                    args.first().map_or("", String::as_str),
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for DockerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRegistry for DockerRegistry {
    async fn build(&self, service: &ServiceSpec, repository: &str, tags: &[String]) -> Result<()> {
        let args = build_args(service, repository, tags);
        self.run(&service.name, &args).await?;
        info!("Built {repository} ({})", tags.join(", "));
        Ok(())
    }

    async fn push(&self, repository: &str, tag: &str) -> Result<String> {
        let reference = format!("{repository}:{tag}");
        let stdout = self
            .run(repository, &["push".to_string(), reference.clone()])
            .await?;

        parse_push_digest(&stdout).ok_or_else(|| ShipgateError::Build {
            service: repository.to_string(),
            reason: format!("push of {reference} reported no digest"),
        })
    }
}

fn build_args(service: &ServiceSpec, repository: &str, tags: &[String]) -> Vec<String> {
    let mut args = vec!["build".to_string()];
    if let Some(dockerfile) = &service.dockerfile {
        args.push("--file".to_string());
        args.push(dockerfile.display().to_string());
    }
    for tag in tags {
        args.push("--tag".to_string());
        args.push(format!("{repository}:{tag}"));
    }
    args.push(service.context.display().to_string());
    args
}

/// Extract the digest from `docker push` output, which ends with a line like
/// `prod-abc123: digest: sha256:... size: 1234`.
pub fn parse_push_digest(stdout: &str) -> Option<String> {
    stdout.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once("digest: ")?;
        let digest = rest.split_whitespace().next()?;
        digest.starts_with("sha256:").then(|| digest.to_string())
    })
}

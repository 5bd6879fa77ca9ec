use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ShipgateError;

/// Findings gathered from the static-analysis tools for a single commit.
///
/// Every field defaults to "no findings" so a partial report (one tool did not
/// run) never inflates or overrides a score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisReport {
    pub lint_errors: u32,
    pub lint_warnings: u32,
    pub security_critical: u32,
    pub security_high: u32,
    pub python_high_severity: u32,
    pub dependency_vulnerabilities: u32,
    pub coverage_percent: Option<f64>,
    pub changed_lines: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScorePair {
    pub quality: u8,
    pub security: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Staging,
        Environment::Production,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Short name used in image tags and commit flags.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Development => "dev",
            Self::Staging => "staging",
            Self::Production => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub commit_sha: String,
    pub target_environment: Option<Environment>,
    pub score_pair: ScorePair,
}

/// What the source-control host tells us about the commit that triggered a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub commit_sha: String,
    pub commit_message: String,
    pub branch: String,
    pub event_type: String,
}

/// A pushed container image, pinned by content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        if !self.digest.is_empty() {
            write!(f, "@{}", self.digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = ShipgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => (name, digest),
            None => (s, ""),
        };

        // A colon before the last slash belongs to a registry port, not a tag
        let name_start = name.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match name[name_start..].rfind(':') {
            Some(i) => (&name[..name_start + i], &name[name_start + i + 1..]),
            None => (name, ""),
        };

        if repository.is_empty() {
            return Err(ShipgateError::Config(format!(
                "Invalid image reference: '{s}'"
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest: digest.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency: Duration,
    pub detail: String,
}

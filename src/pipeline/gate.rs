use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipgateError};
use crate::models::{DeploymentRequest, Environment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentPolicy {
    pub name: Environment,
    pub min_quality: u8,
    pub min_security: u8,
    pub requires_approval: bool,
}

impl EnvironmentPolicy {
    pub fn default_for(name: Environment) -> Self {
        let (min_quality, min_security, requires_approval) = match name {
            Environment::Development => (60, 70, false),
            Environment::Staging => (75, 80, false),
            Environment::Production => (85, 90, true),
        };

        Self {
            name,
            min_quality,
            min_security,
            requires_approval,
        }
    }
}

/// Thresholds for every environment.
///
/// Thresholds never decrease on the way to production; a set that violates
/// this cannot be constructed, including through deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicySet")]
pub struct PolicySet {
    development: EnvironmentPolicy,
    staging: EnvironmentPolicy,
    production: EnvironmentPolicy,
}

impl PolicySet {
    pub fn new(
        development: EnvironmentPolicy,
        staging: EnvironmentPolicy,
        production: EnvironmentPolicy,
    ) -> Result<Self> {
        let tiers = [
            (Environment::Development, &development),
            (Environment::Staging, &staging),
            (Environment::Production, &production),
        ];
        for (expected, policy) in tiers {
            if policy.name != expected {
                return Err(ShipgateError::Config(format!(
                    "Policy for {expected} is named {}",
                    policy.name
                )));
            }
        }

        for pair in tiers.windows(2) {
            let (lower, higher) = (pair[0].1, pair[1].1);
            if higher.min_quality < lower.min_quality || higher.min_security < lower.min_security {
                return Err(ShipgateError::Config(format!(
                    "Thresholds for {} ({}/{}) are below those for {} ({}/{})",
                    higher.name,
                    higher.min_quality,
                    higher.min_security,
                    lower.name,
                    lower.min_quality,
                    lower.min_security
                )));
            }
        }

        Ok(Self {
            development,
            staging,
            production,
        })
    }

    pub fn policy(&self, environment: Environment) -> &EnvironmentPolicy {
        match environment {
            Environment::Development => &self.development,
            Environment::Staging => &self.staging,
            Environment::Production => &self.production,
        }
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            development: EnvironmentPolicy::default_for(Environment::Development),
            staging: EnvironmentPolicy::default_for(Environment::Staging),
            production: EnvironmentPolicy::default_for(Environment::Production),
        }
    }
}

/// Per-environment overrides as they appear in the config file.
#[derive(Debug, Default, Deserialize)]
struct RawPolicy {
    min_quality: Option<u8>,
    min_security: Option<u8>,
    requires_approval: Option<bool>,
}

impl RawPolicy {
    fn resolve(self, name: Environment) -> EnvironmentPolicy {
        let defaults = EnvironmentPolicy::default_for(name);
        EnvironmentPolicy {
            name,
            min_quality: self.min_quality.unwrap_or(defaults.min_quality),
            min_security: self.min_security.unwrap_or(defaults.min_security),
            requires_approval: self.requires_approval.unwrap_or(defaults.requires_approval),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPolicySet {
    development: RawPolicy,
    staging: RawPolicy,
    production: RawPolicy,
}

impl TryFrom<RawPolicySet> for PolicySet {
    type Error = ShipgateError;

    fn try_from(raw: RawPolicySet) -> Result<Self> {
        PolicySet::new(
            raw.development.resolve(Environment::Development),
            raw.staging.resolve(Environment::Staging),
            raw.production.resolve(Environment::Production),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub approved: bool,
    pub reasons: Vec<String>,
}

/// Decide whether a request may be promoted under `policy`.
///
/// Every unmet criterion is reported, not only the first.
pub fn evaluate(req: &DeploymentRequest, policy: &EnvironmentPolicy) -> GateDecision {
    let mut reasons = Vec::new();

    if req.target_environment.is_none() {
        reasons.push("no deployment flag ([dev], [staging], [prod]) in commit message".to_string());
    }

    let scores = req.score_pair;
    if scores.quality < policy.min_quality {
        reasons.push(format!(
            "quality score {} is below the {} minimum of {}",
            scores.quality, policy.name, policy.min_quality
        ));
    }
    if scores.security < policy.min_security {
        reasons.push(format!(
            "security score {} is below the {} minimum of {}",
            scores.security, policy.name, policy.min_security
        ));
    }

    GateDecision {
        approved: reasons.is_empty(),
        reasons,
    }
}

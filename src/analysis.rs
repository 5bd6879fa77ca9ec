//! Builds an [`AnalysisReport`] from the JSON outputs of the static-analysis
//! tools run earlier in the pipeline.
//!
//! A tool whose output file is missing or unreadable contributes no findings.

use std::path::Path;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::models::AnalysisReport;

pub const ESLINT_FILE: &str = "eslint.json";
pub const SEMGREP_FILE: &str = "semgrep.json";
pub const BANDIT_FILE: &str = "bandit.json";
pub const NPM_AUDIT_FILE: &str = "npm-audit.json";
pub const ISTANBUL_COVERAGE_FILE: &str = "coverage-summary.json";
pub const COVERAGE_PY_FILE: &str = "coverage.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EslintFileResult {
    #[serde(default)]
    error_count: u32,
    #[serde(default)]
    warning_count: u32,
}

#[derive(Debug, Deserialize)]
struct FindingList<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SemgrepFinding {
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct SemgrepExtra {
    severity: String,
}

#[derive(Debug, Deserialize)]
struct BanditFinding {
    issue_severity: String,
}

#[derive(Debug, Deserialize)]
struct NpmAudit {
    metadata: NpmAuditMetadata,
}

#[derive(Debug, Deserialize)]
struct NpmAuditMetadata {
    vulnerabilities: NpmVulnerabilities,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NpmVulnerabilities {
    info: u32,
    low: u32,
    moderate: u32,
    high: u32,
    critical: u32,
    total: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct IstanbulSummary {
    total: IstanbulTotals,
}

#[derive(Debug, Deserialize)]
struct IstanbulTotals {
    lines: IstanbulMetric,
}

#[derive(Debug, Deserialize)]
struct IstanbulMetric {
    pct: f64,
}

#[derive(Debug, Deserialize)]
struct CoveragePyReport {
    totals: CoveragePyTotals,
}

#[derive(Debug, Deserialize)]
struct CoveragePyTotals {
    percent_covered: f64,
}

/// Collect every available tool output under `reports_dir`.
pub async fn collect(reports_dir: &Path, changed_lines: Option<u32>) -> AnalysisReport {
    let mut report = AnalysisReport {
        changed_lines,
        ..AnalysisReport::default()
    };

    if let Some(files) = read_json::<Vec<EslintFileResult>>(reports_dir, ESLINT_FILE).await {
        report.lint_errors = files.iter().map(|f| f.error_count).sum();
        report.lint_warnings = files.iter().map(|f| f.warning_count).sum();
    }

    if let Some(semgrep) = read_json::<FindingList<SemgrepFinding>>(reports_dir, SEMGREP_FILE).await
    {
        report.security_critical = count_severity(&semgrep.results, |f| &f.extra.severity, "ERROR");
        report.security_high = count_severity(&semgrep.results, |f| &f.extra.severity, "WARNING");
    }

    if let Some(bandit) = read_json::<FindingList<BanditFinding>>(reports_dir, BANDIT_FILE).await {
        report.python_high_severity = count_severity(&bandit.results, |f| &f.issue_severity, "HIGH");
    }

    if let Some(audit) = read_json::<NpmAudit>(reports_dir, NPM_AUDIT_FILE).await {
        let v = audit.metadata.vulnerabilities;
        report.dependency_vulnerabilities = v.total.unwrap_or_else(|| {
            [v.info, v.low, v.moderate, v.high, v.critical]
                .into_iter()
                .fold(0u32, u32::saturating_add)
        });
    }

    report.coverage_percent =
        match read_json::<IstanbulSummary>(reports_dir, ISTANBUL_COVERAGE_FILE).await {
            Some(summary) => Some(summary.total.lines.pct),
            None => read_json::<CoveragePyReport>(reports_dir, COVERAGE_PY_FILE)
                .await
                .map(|r| r.totals.percent_covered),
        };

    info!(
        "Analysis: {} lint errors, {} warnings, {} critical, {} high, {} python high, {} dependency vulnerabilities, coverage {}",
        report.lint_errors,
        report.lint_warnings,
        report.security_critical,
        report.security_high,
        report.python_high_severity,
        report.dependency_vulnerabilities,
        report
            .coverage_percent
            .map_or_else(|| "unavailable".to_string(), |pct| format!("{pct:.1}%"))
    );

    report
}

fn count_severity<T>(findings: &[T], severity: impl Fn(&T) -> &String, wanted: &str) -> u32 {
    let count = findings
        .iter()
        .filter(|f| severity(*f).eq_ignore_ascii_case(wanted))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

async fn read_json<T: DeserializeOwned>(dir: &Path, file: &str) -> Option<T> {
    let path = dir.join(file);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) => {
            debug!("{} unavailable: {e}", path.display());
            return None;
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unreadable {}: {e}", path.display());
            None
        }
    }
}

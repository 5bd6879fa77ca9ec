use crate::models::{AnalysisReport, ScorePair};

const SMALL_CHANGE_LINES: u32 = 50;
const LARGE_CHANGE_LINES: u32 = 500;
const HIGH_COVERAGE_PERCENT: f64 = 80.0;
const LOW_COVERAGE_PERCENT: f64 = 60.0;

/// Derive quality and security scores from an analysis report.
///
/// Both scores start at 100, take weighted penalties and bonuses, and are
/// clamped to `[0, 100]`.
pub fn compute_scores(report: &AnalysisReport) -> ScorePair {
    ScorePair {
        quality: clamp_score(quality_score(report)),
        security: clamp_score(security_score(report)),
    }
}

fn quality_score(report: &AnalysisReport) -> i64 {
    let mut score = 100
        - penalty(report.lint_errors, 5)
        - penalty(report.lint_warnings, 1)
        - penalty(report.security_critical, 25)
        - penalty(report.security_high, 15);

    match report.changed_lines {
        Some(lines) if lines < SMALL_CHANGE_LINES => score += 5,
        Some(lines) if lines > LARGE_CHANGE_LINES => score -= 5,
        _ => {}
    }

    match report.coverage_percent {
        Some(pct) if pct > HIGH_COVERAGE_PERCENT => score += 5,
        Some(pct) if pct < LOW_COVERAGE_PERCENT => score -= 10,
        _ => {}
    }

    score
}

fn security_score(report: &AnalysisReport) -> i64 {
    100 - penalty(report.security_critical, 20)
        - penalty(report.security_high, 10)
        - penalty(report.python_high_severity, 15)
        - penalty(report.dependency_vulnerabilities, 5)
}

fn penalty(count: u32, weight: i64) -> i64 {
    i64::from(count) * weight
}

fn clamp_score(raw: i64) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = raw.clamp(0, 100) as u8;
    score
}

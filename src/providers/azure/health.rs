use std::time::Instant;

use reqwest::Client;
use serde::Deserialize;

use crate::error::{Result, ShipgateError};
use crate::models::HealthStatus;

#[derive(Debug, Default, Deserialize)]
struct HealthBody {
    status: Option<String>,
    version: Option<String>,
}

/// GET `url` once and judge the response.
///
/// Any 2xx is healthy unless the body reports a status other than
/// `healthy`/`ok`/`up`. Transport failures are errors so the caller counts
/// them as a failed attempt.
pub async fn check(client: &Client, url: &str) -> Result<HealthStatus> {
    let started = Instant::now();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ShipgateError::InfraApi(format!("Health check {url} failed: {e}")))?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let latency = started.elapsed();

    if !status.is_success() {
        return Ok(HealthStatus {
            healthy: false,
            latency,
            detail: format!("HTTP {status}"),
        });
    }

    let parsed: HealthBody = serde_json::from_str(&body).unwrap_or_default();
    let healthy = parsed.status.as_deref().map_or(true, |s| {
        ["healthy", "ok", "up"]
            .iter()
            .any(|good| s.eq_ignore_ascii_case(good))
    });
    let detail = match (parsed.status, parsed.version) {
        (Some(s), Some(v)) => format!("{s} (version {v})"),
        (Some(s), None) => s,
        (None, _) => format!("HTTP {status}"),
    };

    Ok(HealthStatus {
        healthy,
        latency,
        detail,
    })
}

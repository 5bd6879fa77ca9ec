use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::health;
use crate::auth::Token;
use crate::config::{AzureConfig, ServiceSpec};
use crate::error::{Result, ShipgateError};
use crate::models::{Environment, HealthStatus, ImageRef};
use crate::providers::CloudDeployer;

const DOCKER_PREFIX: &str = "DOCKER|";
const OPERATION_POLL_ATTEMPTS: u32 = 60;

pub struct AppServiceClient {
    client: Client,
    management_url: Url,
    config: AzureConfig,
    token: Option<Token>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SiteConfigProperties {
    #[serde(default)]
    linux_fx_version: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SiteConfig {
    #[serde(default)]
    properties: SiteConfigProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotSwap<'a> {
    target_slot: &'a str,
    preserve_vnet: bool,
}

impl AppServiceClient {
    pub fn new(config: AzureConfig, token: Option<Token>, timeout: Duration) -> Result<Self> {
        if config.subscription_id.is_empty() {
            return Err(ShipgateError::Config(
                "azure.subscription_id is required".to_string(),
            ));
        }

        let client = Client::builder()
            .user_agent(concat!("shipgate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ShipgateError::Config(format!("Failed to create HTTP client: {e}")))?;

        let base = if config.management_url.ends_with('/') {
            config.management_url.clone()
        } else {
            format!("{}/", config.management_url)
        };
        let management_url = Url::parse(&base)
            .map_err(|e| ShipgateError::Config(format!("Invalid management URL: {e}")))?;

        Ok(Self {
            client,
            management_url,
            config,
            token,
        })
    }

    fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    fn site_url(&self, environment: Environment, app: &str, path: &str) -> Result<Url> {
        let mut url = self
            .management_url
            .join(&format!(
                "subscriptions/{}/resourceGroups/{}/providers/Microsoft.Web/sites/{app}/{path}",
                self.config.subscription_id,
                self.config.resource_group(environment),
            ))
            .map_err(|e| ShipgateError::Config(format!("Invalid site URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .auth_request(request)
            .send()
            .await
            .map_err(|e| ShipgateError::InfraApi(e.to_string()))?;
        check(response).await
    }

    async fn set_slot_image(
        &self,
        environment: Environment,
        service: &ServiceSpec,
        image: &ImageRef,
    ) -> Result<()> {
        let app = service.app_name(environment);
        let url = self.site_url(
            environment,
            &app,
            &format!("slots/{}/config/web", self.config.slot),
        )?;
        let body = SiteConfig {
            properties: SiteConfigProperties {
                linux_fx_version: format!("{DOCKER_PREFIX}{image}"),
            },
        };

        self.send(self.client.patch(url).json(&body)).await?;
        debug!("Slot {}/{} now runs {image}", app, self.config.slot);
        Ok(())
    }

    async fn wait_for_operation(&self, location: Url) -> Result<()> {
        for _ in 0..OPERATION_POLL_ATTEMPTS {
            tokio::time::sleep(self.config.operation_poll()).await;
            let response = self.send(self.client.get(location.clone())).await?;
            if response.status() != StatusCode::ACCEPTED {
                return Ok(());
            }
        }
        Err(ShipgateError::InfraApi(format!(
            "Operation {location} did not complete"
        )))
    }
}

#[async_trait]
impl CloudDeployer for AppServiceClient {
    async fn live_image(
        &self,
        environment: Environment,
        service: &ServiceSpec,
    ) -> Result<Option<ImageRef>> {
        let app = service.app_name(environment);
        let url = self.site_url(environment, &app, "config/web")?;
        let config = self
            .send(self.client.get(url))
            .await?
            .json::<SiteConfig>()
            .await
            .map_err(|e| ShipgateError::Api(format!("Unreadable site config for {app}: {e}")))?;

        parse_linux_fx_version(&config.properties.linux_fx_version)
    }

    async fn deploy_to_slot(
        &self,
        environment: Environment,
        service: &ServiceSpec,
        image: &ImageRef,
    ) -> Result<()> {
        self.set_slot_image(environment, service, image).await
    }

    async fn health_check(
        &self,
        environment: Environment,
        service: &ServiceSpec,
    ) -> Result<HealthStatus> {
        let base = self.config.slot_base_url(&service.app_name(environment));
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            service.health_path.trim_start_matches('/')
        );
        health::check(&self.client, &url).await
    }

    async fn swap_slots(&self, environment: Environment, service: &ServiceSpec) -> Result<()> {
        let app = service.app_name(environment);
        let url = self.site_url(environment, &app, "slotsswap")?;
        let body = SlotSwap {
            target_slot: &self.config.slot,
            preserve_vnet: true,
        };

        let response = self.send(self.client.post(url).json(&body)).await?;
        if response.status() == StatusCode::ACCEPTED {
            if let Some(location) = operation_location(&response) {
                debug!("Swap of {app} accepted, polling {location}");
                self.wait_for_operation(location).await?;
            }
        }

        info!("Swapped {}/{} into production", app, self.config.slot);
        Ok(())
    }

    async fn rollback(
        &self,
        environment: Environment,
        service: &ServiceSpec,
        previous: Option<&ImageRef>,
    ) -> Result<()> {
        match previous {
            Some(image) => {
                info!("Restoring {} slot of {} to {image}", self.config.slot, service.name);
                self.set_slot_image(environment, service, image).await
            }
            None => {
                warn!(
                    "No previous image for {}; leaving its {} slot as is",
                    service.name, self.config.slot
                );
                Ok(())
            }
        }
    }
}

fn operation_location(response: &Response) -> Option<Url> {
    let value = response.headers().get(LOCATION)?.to_str().ok()?;
    Url::parse(value).ok()
}

/// `DOCKER|repo:tag` names the running image; anything else means the site
/// is not running a container we deployed.
fn parse_linux_fx_version(value: &str) -> Result<Option<ImageRef>> {
    match value.strip_prefix(DOCKER_PREFIX) {
        Some(reference) if !reference.is_empty() => reference.parse().map(Some),
        _ => Ok(None),
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("Azure returned {status}: {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(ShipgateError::InfraApi(message))
    } else {
        Err(ShipgateError::Api(message))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    const SITE: &str =
        "/subscriptions/sub-1/resourceGroups/rg-agency-prod/providers/Microsoft.Web/sites/app-api-prod";

    fn service() -> ServiceSpec {
        ServiceSpec {
            name: "api".to_string(),
            context: PathBuf::from("services/api"),
            dockerfile: None,
            app: "app-api-{env}".to_string(),
            health_path: "/health".to_string(),
        }
    }

    fn client(server: &mockito::ServerGuard) -> AppServiceClient {
        let config = AzureConfig {
            management_url: server.url(),
            subscription_id: "sub-1".to_string(),
            slot_url: format!("{}/{{app}}/{{slot}}", server.url()),
            operation_poll_ms: 1,
            ..AzureConfig::default()
        };
        AppServiceClient::new(config, Some(Token::from("arm-token")), Duration::from_secs(5))
            .unwrap()
    }

    fn api_version() -> Matcher {
        Matcher::UrlEncoded("api-version".to_string(), "2022-03-01".to_string())
    }

    fn image() -> ImageRef {
        ImageRef {
            repository: "acr.io/api".to_string(),
            tag: "prod-abc123".to_string(),
            digest: "sha256:feed".to_string(),
        }
    }

    #[test]
    fn test_subscription_is_required() {
        let result = AppServiceClient::new(AzureConfig::default(), None, Duration::from_secs(5));

        assert!(matches!(result, Err(ShipgateError::Config(_))));
    }

    #[test]
    fn test_parse_linux_fx_version() {
        assert_eq!(
            parse_linux_fx_version("DOCKER|acr.io/api:prod-abc123@sha256:feed").unwrap(),
            Some(image())
        );
        assert_eq!(parse_linux_fx_version("NODE|18-lts").unwrap(), None);
        assert_eq!(parse_linux_fx_version("").unwrap(), None);
    }

    #[tokio::test]
    async fn test_live_image_reads_site_config() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", format!("{SITE}/config/web").as_str())
            .match_query(api_version())
            .match_header("authorization", "Bearer arm-token")
            .with_status(200)
            .with_body(
                json!({"properties": {"linuxFxVersion": "DOCKER|acr.io/api:prod-abc123@sha256:feed"}})
                    .to_string(),
            )
            .create_async()
            .await;

        let live = client(&server)
            .live_image(Environment::Production, &service())
            .await
            .unwrap();

        assert_eq!(live, Some(image()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_deploy_to_slot_patches_slot_config() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", format!("{SITE}/slots/staging/config/web").as_str())
            .match_query(api_version())
            .match_body(Matcher::Json(json!({
                "properties": {"linuxFxVersion": "DOCKER|acr.io/api:prod-abc123@sha256:feed"}
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client(&server)
            .deploy_to_slot(Environment::Production, &service(), &image())
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", format!("{SITE}/slots/staging/config/web").as_str())
            .match_query(api_version())
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let err = client(&server)
            .deploy_to_slot(Environment::Production, &service(), &image())
            .await
            .unwrap_err();

        assert!(matches!(&err, ShipgateError::InfraApi(m) if m.contains("503")));
        assert!(err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_transient() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", format!("{SITE}/slotsswap").as_str())
            .match_query(api_version())
            .with_status(409)
            .with_body(r#"{"error": {"code": "Conflict"}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .swap_slots(Environment::Production, &service())
            .await
            .unwrap_err();

        assert!(matches!(&err, ShipgateError::Api(m) if m.contains("409")));
        assert!(!err.is_transient());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_swap_waits_for_accepted_operation() {
        let mut server = mockito::Server::new_async().await;
        let location = format!("{}/operations/op-1", server.url());
        let swap = server
            .mock("POST", format!("{SITE}/slotsswap").as_str())
            .match_query(api_version())
            .match_body(Matcher::Json(json!({"targetSlot": "staging", "preserveVnet": true})))
            .with_status(202)
            .with_header("location", &location)
            .create_async()
            .await;
        let operation = server
            .mock("GET", "/operations/op-1")
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;

        client(&server)
            .swap_slots(Environment::Production, &service())
            .await
            .unwrap();

        swap.assert_async().await;
        operation.assert_async().await;
    }

    #[tokio::test]
    async fn test_rollback_without_previous_is_a_no_op() {
        let server = mockito::Server::new_async().await;

        client(&server)
            .rollback(Environment::Production, &service(), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_health_check_hits_slot_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/app-api-prod/staging/health")
            .with_status(200)
            .with_body(r#"{"status": "healthy", "timestamp": "2026-01-01T00:00:00Z", "version": "1.0.0"}"#)
            .create_async()
            .await;

        let status = client(&server)
            .health_check(Environment::Production, &service())
            .await
            .unwrap();

        assert!(status.healthy);
        mock.assert_async().await;
    }
}

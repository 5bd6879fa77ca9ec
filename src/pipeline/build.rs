use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use log::{info, warn};

use crate::config::{BuildConfig, ServiceSpec};
use crate::error::{Result, ShipgateError};
use crate::models::{Environment, ImageRef};
use crate::providers::ContainerRegistry;

pub struct BuildCoordinator {
    registry: Arc<dyn ContainerRegistry>,
    config: BuildConfig,
}

impl BuildCoordinator {
    pub fn new(registry: Arc<dyn ContainerRegistry>, config: BuildConfig) -> Self {
        Self { registry, config }
    }

    pub fn repository(&self, service: &ServiceSpec) -> String {
        format!(
            "{}/{}",
            self.config.registry.trim_end_matches('/'),
            service.name
        )
    }

    /// Build and push every service for one commit and environment.
    ///
    /// Services build concurrently, bounded by `max_workers`. The first
    /// failure fails the whole set; the returned map follows the order of
    /// `services`. The floating `{env}-latest` tags move only once every
    /// service has built and pushed its immutable tag.
    pub async fn build_and_push(
        &self,
        commit_sha: &str,
        environment: Environment,
        services: &[ServiceSpec],
    ) -> Result<IndexMap<String, ImageRef>> {
        if services.is_empty() {
            return Err(ShipgateError::Config(
                "No services configured for deployment".to_string(),
            ));
        }

        info!(
            "Building {} services for {environment} at {commit_sha} ({} workers)",
            services.len(),
            self.config.max_workers
        );

        let built: Vec<(String, ImageRef)> = stream::iter(services)
            .map(|service| self.build_service(commit_sha, environment, service))
            .buffer_unordered(self.config.max_workers.max(1))
            .try_collect()
            .await?;

        let mut by_name: IndexMap<String, ImageRef> = built.into_iter().collect();
        let ordered: IndexMap<String, ImageRef> = services
            .iter()
            .filter_map(|s| by_name.shift_remove_entry(&s.name))
            .collect();

        let floating = format!("{}-latest", environment.short_name());
        for (name, image) in &ordered {
            self.registry
                .push(&image.repository, &floating)
                .await
                .map_err(|e| build_error(name, e))?;
        }
        info!("Moved {floating} for {} services", ordered.len());

        Ok(ordered)
    }

    async fn build_service(
        &self,
        commit_sha: &str,
        environment: Environment,
        service: &ServiceSpec,
    ) -> Result<(String, ImageRef)> {
        let repository = self.repository(service);
        let env = environment.short_name();
        let tag = format!("{env}-{commit_sha}");
        let floating = format!("{env}-latest");

        let result = async {
            self.registry
                .build(service, &repository, &[tag.clone(), floating])
                .await?;
            self.registry.push(&repository, &tag).await
        }
        .await;

        match result {
            Ok(digest) => {
                info!("Pushed {repository}:{tag} ({digest})");
                Ok((
                    service.name.clone(),
                    ImageRef {
                        repository,
                        tag,
                        digest,
                    },
                ))
            }
            Err(e) => {
                warn!("Build of service '{}' failed: {e}", service.name);
                Err(build_error(&service.name, e))
            }
        }
    }
}

fn build_error(service: &str, err: ShipgateError) -> ShipgateError {
    let reason = match err {
        ShipgateError::Build { reason, .. } => reason,
        other => other.to_string(),
    };
    ShipgateError::Build {
        service: service.to_string(),
        reason,
    }
}

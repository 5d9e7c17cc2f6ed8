//! Main controller implementation.
//!
//! Resolves the cluster's platform owner, watches the owner and the resources
//! its platform requires, and re-reconciles the owner whenever one of them
//! changes.

use crate::config::Config;
use crate::error::ControllerError;
use kube::core::DynamicObject;
use kube::Client;
use platform_owner::{default_owners, select_owner, OwnerRequest, PlatformOwner};
use tracing::{debug, error, info, warn};
use watch_cache::{CacheOptions, NamespacedCache};

/// Main controller for platform resource watching.
pub struct Controller {
    client: Client,
    owner: Box<dyn PlatformOwner>,
    cache: NamespacedCache,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Platform Watch Controller");

        let client = Client::try_default().await?;

        let owner = select_owner(&client, default_owners())
            .await
            .ok_or(ControllerError::NoPlatformOwner)?;

        let mut options = CacheOptions::new(client.clone());
        options.resync = config.resync;
        options.event_buffer = config.event_buffer;
        let cache = NamespacedCache::new(options).await?;

        Ok(Self { client, owner, cache })
    }

    /// Runs the controller until a shutdown signal arrives.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Platform Watch Controller running (owner: {})", self.owner.name());

        let mapper = self.owner.mapper();
        for request in mapper(&self.owner.object()) {
            self.reconcile_logged(&request).await;
        }

        let events = self.cache.event_stream();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    if let Err(e) = signal {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutdown signal received");
                    break;
                }
                change = events.recv() => {
                    let Some(change) = change else {
                        warn!("Event stream closed");
                        break;
                    };
                    debug!(
                        "Observed {} of {}",
                        change.kind,
                        change.object.metadata.name.as_deref().unwrap_or("<unknown>")
                    );
                    for request in mapper(&change.object) {
                        self.reconcile_logged(&request).await;
                    }
                }
            }
        }

        self.cache.shutdown();
        Ok(())
    }

    async fn reconcile_logged(&self, request: &OwnerRequest) {
        if let Err(e) = self.reconcile(request).await {
            error!("Failed to reconcile platform owner {}: {}", request, e);
        }
    }

    /// Fetches the owner and makes sure it and its platform's resources are watched.
    async fn reconcile(&self, request: &OwnerRequest) -> Result<(), ControllerError> {
        let owned = self.owner.get_owner(&self.client, request).await?;
        let platform = owned
            .platform
            .as_ref()
            .map_or_else(|| "<unset>".to_string(), ToString::to_string);

        let owner = owner_object(self.owner.object(), request);
        let watched = ensure_watches(&self.cache, &owner, &owned.resources).await?;
        info!(
            "Reconciled platform owner {} (platform {}): {} resources watched",
            request, platform, watched
        );
        Ok(())
    }
}

/// Names an owner template after a request
fn owner_object(mut template: DynamicObject, request: &OwnerRequest) -> DynamicObject {
    template.metadata.name = Some(request.name.clone());
    template.metadata.namespace = request.namespace.clone();
    template
}

/// Registers watches for the owner and every owned resource; returns the
/// number of owned resources.
async fn ensure_watches(
    cache: &NamespacedCache,
    owner: &DynamicObject,
    resources: &[DynamicObject],
) -> Result<usize, ControllerError> {
    cache.watch(owner).await?;
    for resource in resources {
        cache.watch(resource).await?;
    }
    Ok(resources.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::Infrastructure;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ApiResource;
    use kube::discovery::Scope;
    use platform_owner::{resources_for, InfrastructureOwner};
    use std::sync::Arc;
    use watch_cache::{MockSessionFactory, SessionScope, StaticMapper};

    async fn cache(factory: &MockSessionFactory) -> NamespacedCache {
        let mapper = StaticMapper::new()
            .with(ApiResource::erase::<Infrastructure>(&()), Scope::Cluster)
            .with(ApiResource::erase::<Deployment>(&()), Scope::Namespaced)
            .with(ApiResource::erase::<ConfigMap>(&()), Scope::Namespaced);
        NamespacedCache::new(
            CacheOptions::default()
                .with_mapper(Arc::new(mapper))
                .with_session_factory(Arc::new(factory.clone())),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_owner_object_is_named_after_request() {
        let owner = owner_object(InfrastructureOwner::new().object(), &OwnerRequest::cluster("cluster"));
        assert_eq!(owner.metadata.name.as_deref(), Some("cluster"));
        assert!(owner.metadata.namespace.is_none());
    }

    #[tokio::test]
    async fn test_ensure_watches_for_aws() {
        let factory = MockSessionFactory::new();
        let cache = cache(&factory).await;
        let owner = owner_object(InfrastructureOwner::new().object(), &OwnerRequest::cluster("cluster"));
        let resources = resources_for(&crds::PlatformType::AWS);

        let watched = ensure_watches(&cache, &owner, &resources).await.unwrap();

        assert_eq!(watched, 2);
        assert_eq!(cache.watch_count().await, 3);
        assert_eq!(
            factory.created_scopes(),
            vec![
                SessionScope::Cluster,
                SessionScope::Namespace(platform_owner::cloud::aws::CCM_NAMESPACE.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_ensure_watches_is_repeatable() {
        let factory = MockSessionFactory::new();
        let cache = cache(&factory).await;
        let owner = owner_object(InfrastructureOwner::new().object(), &OwnerRequest::cluster("cluster"));
        let resources = resources_for(&crds::PlatformType::AWS);

        ensure_watches(&cache, &owner, &resources).await.unwrap();
        ensure_watches(&cache, &owner, &resources).await.unwrap();

        assert_eq!(cache.watch_count().await, 3);
        assert_eq!(factory.created_count(), 2);
    }
}

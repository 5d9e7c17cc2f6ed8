//! Infrastructure-backed platform owner.

use crate::cloud;
use crate::error::PlatformError;
use crate::owner::{OwnedPlatform, OwnerMapper, OwnerRequest, PlatformOwner};
use crds::Infrastructure;
use kube::api::{Api, ListParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Platform owner backed by the cluster's `Infrastructure` objects.
#[derive(Debug, Clone, Default)]
pub struct InfrastructureOwner {
    owners: Vec<OwnerRequest>,
}

impl InfrastructureOwner {
    /// Creates an owner with no discovered objects
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an owner that already knows its objects
    #[must_use]
    pub fn with_owners(owners: Vec<OwnerRequest>) -> Self {
        Self { owners }
    }

    /// Owner objects discovered by `init`
    #[must_use]
    pub fn owners(&self) -> &[OwnerRequest] {
        &self.owners
    }
}

#[async_trait::async_trait]
impl PlatformOwner for InfrastructureOwner {
    fn name(&self) -> &'static str {
        "Infrastructure"
    }

    async fn init(&mut self, client: &Client) -> bool {
        let api: Api<Infrastructure> = Api::all(client.clone());
        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(e) => {
                error!("Unable to list Infrastructure objects: {}", e);
                return false;
            }
        };
        if list.items.is_empty() {
            debug!("No Infrastructure objects in the cluster");
            return false;
        }

        self.owners = list
            .items
            .iter()
            .filter_map(|infra| infra.metadata.name.clone())
            .map(OwnerRequest::cluster)
            .collect();
        true
    }

    async fn get_owner(&self, client: &Client, request: &OwnerRequest) -> Result<OwnedPlatform, PlatformError> {
        let api: Api<Infrastructure> = Api::all(client.clone());
        let infra = api.get_opt(&request.name).await.map_err(|e| {
            error!("Unable to retrieve Infrastructure {}: {}", request, e);
            PlatformError::Kube(e)
        })?;
        let infra = infra.ok_or_else(|| PlatformError::NotFound(format!("Infrastructure {}", request)))?;

        let platform = infra.platform_type();
        let resources = match &platform {
            Some(platform) => cloud::resources_for(platform),
            None => {
                warn!("Infrastructure {} does not report a platform yet", request);
                Vec::new()
            }
        };

        Ok(OwnedPlatform {
            owner: infra.metadata,
            platform,
            resources,
        })
    }

    fn object(&self) -> DynamicObject {
        let mut obj = DynamicObject::new("", &ApiResource::erase::<Infrastructure>(&()));
        obj.metadata.name = None;
        obj
    }

    fn mapper(&self) -> OwnerMapper {
        let owners = self.owners.clone();
        Arc::new(move |_changed: &DynamicObject| owners.clone())
    }
}

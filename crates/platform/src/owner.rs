//! Platform owner abstraction.
//!
//! A platform owner is the cluster object that tells which cloud platform the
//! cluster runs on. Each owner kind gets one `PlatformOwner` implementation;
//! the first one that finds its objects in the cluster is used.

use crate::error::PlatformError;
use crds::PlatformType;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use kube::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request to reconcile one owner object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRequest {
    /// Owner name
    pub name: String,
    /// Owner namespace, `None` for cluster-scoped owners
    pub namespace: Option<String>,
}

impl OwnerRequest {
    /// Request for a cluster-scoped owner
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }
}

impl fmt::Display for OwnerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Maps a changed object to the owner requests it should trigger
pub type OwnerMapper = Arc<dyn Fn(&DynamicObject) -> Vec<OwnerRequest> + Send + Sync>;

/// Resolved owner and the resources its platform requires
#[derive(Debug, Clone)]
pub struct OwnedPlatform {
    /// Owner object metadata
    pub owner: ObjectMeta,
    /// Platform reported by the owner, if any
    pub platform: Option<PlatformType>,
    /// Resources the platform requires to be watched
    pub resources: Vec<DynamicObject>,
}

/// Source of truth for a cluster's platform.
#[async_trait::async_trait]
pub trait PlatformOwner: Send + Sync {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Probes the cluster for owner objects. Returns false when there are none
    /// or they cannot be listed.
    async fn init(&mut self, client: &Client) -> bool;

    /// Fetches an owner and the resources of its platform
    async fn get_owner(&self, client: &Client, request: &OwnerRequest) -> Result<OwnedPlatform, PlatformError>;

    /// Unnamed object of the owner kind
    fn object(&self) -> DynamicObject;

    /// Mapper from any change to the owners discovered by `init`
    fn mapper(&self) -> OwnerMapper;
}

/// Returns the first owner whose `init` succeeds
pub async fn select_owner(
    client: &Client,
    candidates: Vec<Box<dyn PlatformOwner>>,
) -> Option<Box<dyn PlatformOwner>> {
    for mut candidate in candidates {
        debug!("Probing platform owner {}", candidate.name());
        if candidate.init(client).await {
            info!("Using platform owner {}", candidate.name());
            return Some(candidate);
        }
    }
    warn!("No platform owner found in the cluster");
    None
}

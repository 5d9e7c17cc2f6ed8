//! Kind scope resolution.
//!
//! Resolves the group-kind of a resource object from its type metadata and
//! looks up whether that kind is namespace-scoped or cluster-scoped using
//! cluster discovery metadata.

use crate::error::WatchCacheError;
use crate::session::SessionScope;
use kube::core::{ApiResource, DynamicObject};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Version-independent identifier of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKind {
    /// API group, empty for the core group
    pub group: String,
    /// Resource kind
    pub kind: String,
}

impl GroupKind {
    /// Creates a group-kind
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    /// Parses the group out of an `apiVersion` (`group/version` or `version`)
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let group = match api_version.split_once('/') {
            Some((group, _version)) => group,
            None => "",
        };
        Self::new(group, kind)
    }
}

impl From<&ApiResource> for GroupKind {
    fn from(ar: &ApiResource) -> Self {
        Self::new(ar.group.clone(), ar.kind.clone())
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Resolved API resource and scope for a group-kind.
#[derive(Debug, Clone)]
pub struct Mapping {
    /// Preferred API resource (version, plural) served for the kind
    pub resource: ApiResource,
    /// Whether instances are namespace-partitioned or cluster-wide
    pub scope: Scope,
}

impl Mapping {
    /// Returns true when instances of the kind live in a namespace
    #[must_use]
    pub fn is_namespaced(&self) -> bool {
        matches!(self.scope, Scope::Namespaced)
    }

    /// Group-kind of the mapped resource
    #[must_use]
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::from(&self.resource)
    }
}

/// Maps a group-kind to its served resource and scope.
pub trait RestMapper: Send + Sync {
    /// Look up the mapping for a group-kind
    fn mapping(&self, gk: &GroupKind) -> Result<Mapping, WatchCacheError>;
}

/// `RestMapper` backed by a snapshot of cluster discovery.
pub struct DiscoveryMapper {
    discovery: Discovery,
}

impl DiscoveryMapper {
    /// Runs discovery against the cluster and keeps the result
    pub async fn discover(client: Client) -> Result<Self, WatchCacheError> {
        let discovery = Discovery::new(client)
            .run()
            .await
            .map_err(|e| WatchCacheError::Discovery(format!("could not run API discovery: {}", e)))?;
        info!("API discovery complete: {} groups", discovery.groups().count());
        Ok(Self { discovery })
    }
}

impl fmt::Debug for DiscoveryMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryMapper").finish_non_exhaustive()
    }
}

impl RestMapper for DiscoveryMapper {
    fn mapping(&self, gk: &GroupKind) -> Result<Mapping, WatchCacheError> {
        let group = self
            .discovery
            .get(&gk.group)
            .ok_or_else(|| WatchCacheError::Discovery(format!("API group not served for {}", gk)))?;
        let (resource, caps) = group
            .recommended_kind(&gk.kind)
            .ok_or_else(|| WatchCacheError::Discovery(format!("no matches for kind {}", gk)))?;
        Ok(Mapping {
            resource,
            scope: caps.scope,
        })
    }
}

/// `RestMapper` over a fixed table of kinds.
#[derive(Debug, Clone, Default)]
pub struct StaticMapper {
    mappings: HashMap<GroupKind, Mapping>,
}

impl StaticMapper {
    /// Creates an empty mapper
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a kind and returns the mapper
    #[must_use]
    pub fn with(mut self, resource: ApiResource, scope: Scope) -> Self {
        self.insert(resource, scope);
        self
    }

    /// Adds a kind
    pub fn insert(&mut self, resource: ApiResource, scope: Scope) {
        let gk = GroupKind::from(&resource);
        self.mappings.insert(gk, Mapping { resource, scope });
    }
}

impl RestMapper for StaticMapper {
    fn mapping(&self, gk: &GroupKind) -> Result<Mapping, WatchCacheError> {
        self.mappings
            .get(gk)
            .cloned()
            .ok_or_else(|| WatchCacheError::Discovery(format!("no matches for kind {}", gk)))
    }
}

/// Resolves kinds and scopes of resource objects.
#[derive(Clone)]
pub struct ScopeResolver {
    mapper: Arc<dyn RestMapper>,
}

impl fmt::Debug for ScopeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeResolver").finish_non_exhaustive()
    }
}

impl ScopeResolver {
    /// Creates a resolver over a mapper
    pub fn new(mapper: Arc<dyn RestMapper>) -> Self {
        Self { mapper }
    }

    /// Group-kind of an object, from its `apiVersion` and `kind`
    pub fn group_kind_of(&self, obj: &DynamicObject) -> Result<GroupKind, WatchCacheError> {
        let types = obj.types.as_ref().ok_or_else(|| {
            WatchCacheError::Discovery(format!(
                "object {} has no apiVersion/kind set",
                obj.metadata.name.as_deref().unwrap_or("<unnamed>")
            ))
        })?;
        if types.kind.is_empty() || types.api_version.is_empty() {
            return Err(WatchCacheError::Discovery(format!(
                "object {} has an incomplete type (apiVersion={:?}, kind={:?})",
                obj.metadata.name.as_deref().unwrap_or("<unnamed>"),
                types.api_version,
                types.kind
            )));
        }
        Ok(GroupKind::from_api_version(&types.api_version, &types.kind))
    }

    /// Mapping for an object's kind
    pub fn mapping_for(&self, obj: &DynamicObject) -> Result<Mapping, WatchCacheError> {
        let gk = self.group_kind_of(obj)?;
        self.mapper.mapping(&gk)
    }

    /// Returns true when the object's kind is namespace-scoped
    pub fn is_namespaced(&self, obj: &DynamicObject) -> Result<bool, WatchCacheError> {
        Ok(self.mapping_for(obj)?.is_namespaced())
    }

    /// Fails for namespace-scoped objects that do not set a namespace
    pub fn ensure_namespace(&self, obj: &DynamicObject) -> Result<(), WatchCacheError> {
        let mapping = self.mapping_for(obj)?;
        check_namespace(obj, &mapping)
    }

    /// Session scope an object must be watched from.
    ///
    /// Cluster-scoped kinds always land in [`SessionScope::Cluster`], even when
    /// the object carries a namespace.
    pub fn session_scope(
        &self,
        obj: &DynamicObject,
        mapping: &Mapping,
    ) -> Result<SessionScope, WatchCacheError> {
        check_namespace(obj, mapping)?;
        if !mapping.is_namespaced() {
            if obj.metadata.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
                debug!(
                    "Ignoring namespace on cluster-scoped {} {}",
                    mapping.group_kind(),
                    obj.metadata.name.as_deref().unwrap_or("<unnamed>")
                );
            }
            return Ok(SessionScope::Cluster);
        }
        // check_namespace guarantees a non-empty namespace here
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        Ok(SessionScope::Namespace(namespace))
    }
}

fn check_namespace(obj: &DynamicObject, mapping: &Mapping) -> Result<(), WatchCacheError> {
    let has_namespace = obj.metadata.namespace.as_deref().is_some_and(|ns| !ns.is_empty());
    if mapping.is_namespaced() && !has_namespace {
        return Err(WatchCacheError::InvalidArgument(format!(
            "namespaced object {} {} must set its namespace",
            mapping.group_kind(),
            obj.metadata.name.as_deref().unwrap_or("<unnamed>")
        )));
    }
    Ok(())
}

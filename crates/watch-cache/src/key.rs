//! Watch dedup keys.

use crate::error::WatchCacheError;
use crate::scope::ScopeResolver;
use kube::core::DynamicObject;
use std::fmt;

/// Canonical `<group-kind>/<name>` key of a watched object, unique within a session scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchKey(String);

impl WatchKey {
    /// Derives the key for an object
    pub fn for_object(resolver: &ScopeResolver, obj: &DynamicObject) -> Result<Self, WatchCacheError> {
        let gk = resolver.group_kind_of(obj)?;
        let name = obj.metadata.name.as_deref().unwrap_or_default();
        Ok(Self(format!("{}/{}", gk, name)))
    }

    /// Key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::StaticMapper;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::core::ApiResource;
    use std::sync::Arc;

    fn resolver() -> ScopeResolver {
        ScopeResolver::new(Arc::new(StaticMapper::new()))
    }

    #[test]
    fn test_key_for_core_kind() {
        let obj = DynamicObject::new("cc-config", &ApiResource::erase::<ConfigMap>(&())).within("kube-system");
        let key = WatchKey::for_object(&resolver(), &obj).unwrap();
        assert_eq!(key.as_str(), "ConfigMap/cc-config");
    }

    #[test]
    fn test_key_for_grouped_kind() {
        let obj = DynamicObject::new("aws-cloud-controller-manager", &ApiResource::erase::<Deployment>(&()));
        let key = WatchKey::for_object(&resolver(), &obj).unwrap();
        assert_eq!(key.to_string(), "Deployment.apps/aws-cloud-controller-manager");
    }

    #[test]
    fn test_key_ignores_version_and_namespace() {
        let mut ar = ApiResource::erase::<Deployment>(&());
        let a = DynamicObject::new("ccm", &ar).within("one");
        ar.version = "v1beta2".to_string();
        ar.api_version = "apps/v1beta2".to_string();
        let b = DynamicObject::new("ccm", &ar).within("two");
        assert_eq!(
            WatchKey::for_object(&resolver(), &a).unwrap(),
            WatchKey::for_object(&resolver(), &b).unwrap()
        );
    }

    #[test]
    fn test_key_requires_type_metadata() {
        let mut obj = DynamicObject::new("cc-config", &ApiResource::erase::<ConfigMap>(&()));
        obj.types = None;
        assert!(WatchKey::for_object(&resolver(), &obj).unwrap_err().is_discovery());
    }
}

//! Resources each cloud platform requires.

pub mod aws;

use crds::PlatformType;
use kube::core::DynamicObject;
use std::collections::HashSet;
use tracing::{info, warn};

/// Resources owned on behalf of a platform
pub type OwnedResources = Vec<DynamicObject>;

/// Resources required by a platform; empty for unsupported platforms
#[must_use]
pub fn resources_for(platform: &PlatformType) -> OwnedResources {
    match platform {
        PlatformType::AWS => aws::resources(),
        other => {
            warn!("No recognized cloud provider platform found in infrastructure: {}", other);
            Vec::new()
        }
    }
}

/// Union of every supported platform's resources, one per resource type.
///
/// Resource types are compared by apiVersion and kind; the first resource of
/// each type wins.
#[must_use]
pub fn owned_resources_group() -> OwnedResources {
    dedup_by_type([aws::resources()])
}

fn dedup_by_type<I>(groups: I) -> OwnedResources
where
    I: IntoIterator<Item = OwnedResources>,
{
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();
    for resource in groups.into_iter().flatten() {
        let type_key = resource
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        info!("Owned resource type {}/{}", type_key.0, type_key.1);
        if seen.insert(type_key) {
            distinct.push(resource);
        }
    }
    distinct
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(resources: &[DynamicObject]) -> Vec<&str> {
        resources.iter().filter_map(|r| r.metadata.name.as_deref()).collect()
    }

    #[test]
    fn test_resources_for_aws() {
        let resources = resources_for(&PlatformType::AWS);
        assert_eq!(names(&resources), vec![aws::CCM_DEPLOYMENT, aws::CLOUD_CONFIG]);
    }

    #[test]
    fn test_resources_for_unsupported_platform() {
        assert!(resources_for(&PlatformType::BareMetal).is_empty());
        assert!(resources_for(&PlatformType::Unknown("Mystery".to_string())).is_empty());
    }

    #[test]
    fn test_owned_resources_group_has_one_resource_per_type() {
        let group = owned_resources_group();
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn test_dedup_keeps_first_of_each_type() {
        let mut second = aws::resources();
        for resource in &mut second {
            resource.metadata.name = Some("duplicate".to_string());
        }

        let distinct = dedup_by_type([aws::resources(), second]);
        assert_eq!(names(&distinct), vec![aws::CCM_DEPLOYMENT, aws::CLOUD_CONFIG]);
    }
}

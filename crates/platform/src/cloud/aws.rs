//! AWS cloud controller manager resources.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::{ApiResource, DynamicObject};

/// Namespace the cloud controller manager runs in
pub const CCM_NAMESPACE: &str = "openshift-cloud-controller-manager";

/// Name of the AWS cloud controller manager deployment
pub const CCM_DEPLOYMENT: &str = "aws-cloud-controller-manager";

/// Name of the cloud configuration ConfigMap
pub const CLOUD_CONFIG: &str = "cloud-conf";

/// Resources the AWS platform requires
#[must_use]
pub fn resources() -> Vec<DynamicObject> {
    vec![
        DynamicObject::new(CCM_DEPLOYMENT, &ApiResource::erase::<Deployment>(&())).within(CCM_NAMESPACE),
        DynamicObject::new(CLOUD_CONFIG, &ApiResource::erase::<ConfigMap>(&())).within(CCM_NAMESPACE),
    ]
}

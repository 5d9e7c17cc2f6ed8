//! Infrastructure CRD
//!
//! Cluster-wide `config.openshift.io/v1` resource describing the platform the
//! cluster runs on. Only the fields needed to determine the cloud platform and
//! its cloud configuration are modelled; unknown fields are ignored.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Desired configuration of the cluster infrastructure
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Infrastructure",
    status = "InfrastructureStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Reference to the ConfigMap holding the cloud provider configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<ConfigMapFileReference>,

    /// Desired platform configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_spec: Option<PlatformSpec>,
}

/// Key within a ConfigMap in the `openshift-config` namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapFileReference {
    /// ConfigMap name
    #[serde(default)]
    pub name: String,

    /// Key of the file within the ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Platform-specific desired configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Platform type name (e.g., "AWS")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub platform_type: Option<String>,
}

/// Observed state of the cluster infrastructure
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    /// Unique identifier of the cluster's infrastructure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_name: Option<String>,

    /// Deprecated platform type; superseded by `platformStatus.type`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Observed platform details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_status: Option<PlatformStatus>,

    /// External API server URL
    #[serde(rename = "apiServerURL", default, skip_serializing_if = "Option::is_none")]
    pub api_server_url: Option<String>,

    /// Internal API server URL
    #[serde(rename = "apiServerInternalURI", default, skip_serializing_if = "Option::is_none")]
    pub api_server_internal_uri: Option<String>,
}

/// Platform type and provider-specific status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Platform type name (e.g., "AWS")
    #[serde(rename = "type", default)]
    pub platform_type: String,

    /// AWS-specific status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPlatformStatus>,
}

/// AWS provider status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AwsPlatformStatus {
    /// AWS region of the cluster
    #[serde(default)]
    pub region: String,
}

/// Underlying infrastructure provider of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlatformType {
    /// Amazon Web Services
    AWS,
    /// Microsoft Azure
    Azure,
    /// Bare metal hosts
    BareMetal,
    /// Google Cloud Platform
    GCP,
    /// Libvirt virtual machines
    Libvirt,
    /// OpenStack
    OpenStack,
    /// No platform integration
    None,
    /// VMware vSphere
    VSphere,
    /// oVirt
    OVirt,
    /// IBM Cloud
    IBMCloud,
    /// KubeVirt virtual machines
    KubeVirt,
    /// Equinix Metal
    EquinixMetal,
    /// IBM Power Virtual Server
    PowerVS,
    /// Alibaba Cloud
    AlibabaCloud,
    /// Nutanix
    Nutanix,
    /// Platform integrated by an external provider
    External,
    /// A type this crate does not know about
    Unknown(String),
}

impl PlatformType {
    /// Name as it appears in the Infrastructure status
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AWS => "AWS",
            Self::Azure => "Azure",
            Self::BareMetal => "BareMetal",
            Self::GCP => "GCP",
            Self::Libvirt => "Libvirt",
            Self::OpenStack => "OpenStack",
            Self::None => "None",
            Self::VSphere => "VSphere",
            Self::OVirt => "oVirt",
            Self::IBMCloud => "IBMCloud",
            Self::KubeVirt => "KubeVirt",
            Self::EquinixMetal => "EquinixMetal",
            Self::PowerVS => "PowerVS",
            Self::AlibabaCloud => "AlibabaCloud",
            Self::Nutanix => "Nutanix",
            Self::External => "External",
            Self::Unknown(name) => name,
        }
    }
}

impl From<&str> for PlatformType {
    fn from(name: &str) -> Self {
        match name {
            "AWS" => Self::AWS,
            "Azure" => Self::Azure,
            "BareMetal" => Self::BareMetal,
            "GCP" => Self::GCP,
            "Libvirt" => Self::Libvirt,
            "OpenStack" => Self::OpenStack,
            "None" => Self::None,
            "VSphere" => Self::VSphere,
            "oVirt" => Self::OVirt,
            "IBMCloud" => Self::IBMCloud,
            "KubeVirt" => Self::KubeVirt,
            "EquinixMetal" => Self::EquinixMetal,
            "PowerVS" => Self::PowerVS,
            "AlibabaCloud" => Self::AlibabaCloud,
            "Nutanix" => Self::Nutanix,
            "External" => Self::External,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Infrastructure {
    /// Observed platform type.
    ///
    /// Prefers `status.platformStatus.type`, falling back to the deprecated
    /// `status.platform`. `None` when neither is set.
    #[must_use]
    pub fn platform_type(&self) -> Option<PlatformType> {
        let status = self.status.as_ref()?;
        status
            .platform_status
            .as_ref()
            .map(|ps| ps.platform_type.as_str())
            .filter(|name| !name.is_empty())
            .or(status.platform.as_deref())
            .filter(|name| !name.is_empty())
            .map(PlatformType::from)
    }
}

//! Platform owner discovery
//!
//! Finds the cluster object that declares the cloud platform, and translates
//! that platform into the list of resources a controller must watch.

pub mod cloud;
pub mod error;
pub mod infrastructure;
pub mod owner;

pub use cloud::{owned_resources_group, resources_for, OwnedResources};
pub use error::PlatformError;
pub use infrastructure::InfrastructureOwner;
pub use owner::{select_owner, OwnedPlatform, OwnerMapper, OwnerRequest, PlatformOwner};

/// Every known platform owner, in probing order
#[must_use]
pub fn default_owners() -> Vec<Box<dyn PlatformOwner>> {
    vec![Box::new(InfrastructureOwner::new())]
}

//! Cluster CRD Definitions
//!
//! Typed definitions for the cluster-scoped configuration objects the
//! platform watch controller reads.

#![warn(missing_docs)]

pub mod infrastructure;

pub use infrastructure::*;

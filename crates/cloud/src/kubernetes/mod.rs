//! Kubernetes batch Job support: manifest building and the cluster client.

pub mod client;
pub mod manifest;

pub use client::{ClusterApi, ClusterError, JobHandle, KubeCluster};
pub use manifest::{build_job_manifest, BatchJobSpec, CostTier};

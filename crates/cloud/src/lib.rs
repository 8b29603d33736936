//! Cloud provider adapters.
//!
//! - [`s3`]: [`S3ObjectStore`], the production [`quant_core::ObjectStore`].
//! - [`kubernetes`]: batch Job manifests and the [`ClusterApi`] seam.

pub mod kubernetes;
pub mod s3;

pub use kubernetes::{ClusterApi, ClusterError, JobHandle, KubeCluster};
pub use s3::S3ObjectStore;

//! Cluster API seam and its `kube` implementation.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use kube::api::PostParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use quant_core::config::ClusterConfig;
use quant_core::status::ClusterJobStatus;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Kubernetes client setup failed: {0}")]
    Bootstrap(String),

    #[error("Kubernetes API error: {0}")]
    Api(String),
}

/// Identifies a created batch Job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub namespace: String,
    pub name: String,
}

/// The two cluster operations the orchestration engine needs.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create `job` in the namespace named by its metadata.
    async fn create_batch_job(&self, job: &Job) -> Result<JobHandle, ClusterError>;

    /// Current pod counts of a batch Job.
    async fn get_batch_job_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterJobStatus, ClusterError>;
}

// ---------------------------------------------------------------------------
// kube implementation
// ---------------------------------------------------------------------------

/// [`ClusterApi`] backed by a real Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the configured location.
    ///
    /// `external` reads the kubeconfig at `kubeconfig_path` (developer
    /// machines, CI). Anything else uses the pod's service account.
    pub async fn connect(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let kube_config = if config.is_external_cluster() {
            tracing::info!(path = %config.kubeconfig_path, "Using external kubeconfig");
            let kubeconfig = Kubeconfig::read_from(&config.kubeconfig_path).map_err(|e| {
                ClusterError::Bootstrap(format!(
                    "Reading kubeconfig {}: {e}",
                    config.kubeconfig_path
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| ClusterError::Bootstrap(e.to_string()))?
        } else {
            tracing::info!("Using in-cluster Kubernetes config");
            Config::incluster().map_err(|e| ClusterError::Bootstrap(e.to_string()))?
        };

        let client =
            Client::try_from(kube_config).map_err(|e| ClusterError::Bootstrap(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_batch_job(&self, job: &Job) -> Result<JobHandle, ClusterError> {
        let namespace = job
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| ClusterError::Api("Job manifest has no namespace".to_string()))?;

        let created = self
            .jobs(&namespace)
            .create(&PostParams::default(), job)
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        let name = created
            .metadata
            .name
            .or_else(|| job.metadata.name.clone())
            .ok_or_else(|| ClusterError::Api("Created Job has no name".to_string()))?;

        Ok(JobHandle {
            namespace: created.metadata.namespace.unwrap_or(namespace),
            name,
        })
    }

    async fn get_batch_job_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ClusterJobStatus, ClusterError> {
        let job = self
            .jobs(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?;

        Ok(job.status.as_ref().map(job_status_counts).unwrap_or_default())
    }
}

/// Pod counts from a Job status. Absent counts mean zero.
pub fn job_status_counts(status: &JobStatus) -> ClusterJobStatus {
    ClusterJobStatus {
        succeeded: count(status.succeeded),
        failed: count(status.failed),
        active: count(status.active),
        ready: count(status.ready),
    }
}

fn count(value: Option<i32>) -> u32 {
    value.and_then(|v| u32::try_from(v).ok()).unwrap_or(0)
}

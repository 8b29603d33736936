//! Cluster backend.
//!
//! Submits a job group as one indexed batch Job and supervises it until
//! every node has succeeded, a fatal error occurs, or the deadline plus
//! [`TIMEOUT_GRACE`] has elapsed.
//!
//! Supervision runs in a spawned task. It reports to the caller over two
//! channels created per call:
//!
//! - progress: a bounded `mpsc` of status summaries, closed when the task
//!   ends;
//! - errors: a `oneshot` carrying the fatal error, if any.
//!
//! The task sends its error before it drops the progress sender, so a
//! closed progress channel with nothing pending on the error channel means
//! success.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use quant_cloud::kubernetes::{build_job_manifest, BatchJobSpec};
use quant_cloud::{ClusterApi, KubeCluster};
use quant_core::config::ClusterConfig;
use quant_core::job::JobGroup;
use quant_core::status::ClusterJobStatus;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::backend::JobBackend;
use crate::error::JobError;

/// Time between two status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Extra time allowed past the Job's own deadline before giving up.
pub const TIMEOUT_GRACE: Duration = Duration::from_secs(60);

/// An unread progress message blocks the supervisor until it is consumed.
const PROGRESS_CAPACITY: usize = 1;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of one supervised batch Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionState {
    Submitting,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl SupervisionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitting => "submitting",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Supervisor {
    cluster: Arc<dyn ClusterApi>,
    spec: BatchJobSpec,
    manifest: Job,
    poll_interval: Duration,
    state: SupervisionState,
}

impl Supervisor {
    fn enter(&mut self, next: SupervisionState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "Supervision state");
        self.state = next;
    }

    async fn run(
        mut self,
        progress: mpsc::Sender<String>,
        errors: oneshot::Sender<JobError>,
    ) -> SupervisionState {
        if let Err(e) = self.supervise(&progress).await {
            let next = match e {
                JobError::Timeout { .. } => SupervisionState::TimedOut,
                _ => SupervisionState::Failed,
            };
            self.enter(next);
            tracing::error!(error = %e, "Job failed");
            let _ = errors.send(e);
        }
        drop(progress);
        self.state
    }

    async fn supervise(&mut self, progress: &mpsc::Sender<String>) -> Result<(), JobError> {
        let node_count = self.spec.node_count;
        let namespace = self.spec.tier.namespace.clone();

        tracing::info!(
            namespace = %namespace,
            service_account = %self.spec.tier.service_account,
            node_count,
            "Creating batch job"
        );
        let handle = self
            .cluster
            .create_batch_job(&self.manifest)
            .await
            .map_err(|e| JobError::Submission {
                job_id: self.spec.name.clone(),
                namespace: namespace.clone(),
                node_count,
                message: e.to_string(),
            })?;
        self.enter(SupervisionState::Polling);

        let deadline =
            Duration::from_secs(u64::from(self.spec.active_deadline_sec)) + TIMEOUT_GRACE;
        let started = Instant::now();
        let mut last_summary = String::new();
        let mut last_status: Option<ClusterJobStatus> = None;

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let status = self
                .cluster
                .get_batch_job_status(&handle.namespace, &handle.name)
                .await
                .map_err(|e| JobError::StatusPoll {
                    job_id: self.spec.name.clone(),
                    namespace: namespace.clone(),
                    node_count,
                    last_status,
                    message: e.to_string(),
                })?;
            last_status = Some(status);

            let summary = status.summary(node_count);
            if summary != last_summary {
                if progress.send(summary.clone()).await.is_err() {
                    // Caller went away; nobody is left to report to.
                    tracing::warn!("Progress receiver dropped, abandoning supervision");
                    return Ok(());
                }
                last_summary = summary;
            }

            if status.is_complete(node_count) {
                self.enter(SupervisionState::Succeeded);
                return Ok(());
            }

            if started.elapsed() > deadline {
                return Err(JobError::Timeout {
                    namespace: handle.namespace.clone(),
                    job_id: handle.name.clone(),
                    succeeded: status.succeeded,
                    failed: status.failed,
                    active: status.active,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller side of one supervision task.
pub struct SupervisionHandle {
    progress: mpsc::Receiver<String>,
    errors: oneshot::Receiver<JobError>,
    task: JoinHandle<SupervisionState>,
}

impl SupervisionHandle {
    /// Block until the supervised Job reaches a terminal state, passing
    /// every progress message to `on_progress`.
    pub async fn wait<F>(mut self, mut on_progress: F) -> Result<SupervisionState, JobError>
    where
        F: FnMut(&str),
    {
        let mut errors_open = true;

        loop {
            tokio::select! {
                biased;

                received = &mut self.errors, if errors_open => match received {
                    Ok(e) => return Err(e),
                    // Sender dropped without an error: keep draining progress.
                    Err(_) => errors_open = false,
                },

                message = self.progress.recv() => match message {
                    Some(message) => on_progress(&message),
                    None => break,
                },
            }
        }

        if errors_open {
            if let Ok(e) = self.errors.try_recv() {
                return Err(e);
            }
        }

        self.task
            .await
            .map_err(|e| JobError::Supervisor(e.to_string()))
    }
}

/// Submit `manifest` and start supervising it in a background task.
pub fn spawn_supervisor(
    cluster: Arc<dyn ClusterApi>,
    spec: BatchJobSpec,
    manifest: Job,
    poll_interval: Duration,
) -> SupervisionHandle {
    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CAPACITY);
    let (error_tx, error_rx) = oneshot::channel();

    let span = tracing::info_span!(
        "batch_job",
        job_group_id = %spec.job_group_id,
        job = %spec.name,
    );
    let supervisor = Supervisor {
        cluster,
        spec,
        manifest,
        poll_interval,
        state: SupervisionState::Submitting,
    };
    let task = tokio::spawn(supervisor.run(progress_tx, error_tx).instrument(span));

    SupervisionHandle {
        progress: progress_rx,
        errors: error_rx,
        task,
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Runs a job group as a Kubernetes indexed batch Job.
#[derive(Clone)]
pub struct KubernetesBackend {
    cluster: Option<Arc<dyn ClusterApi>>,
    poll_interval: Duration,
}

impl Default for KubernetesBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KubernetesBackend {
    /// Connects to the cluster named by the configuration on every start.
    pub fn new() -> Self {
        Self {
            cluster: None,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Use `cluster` instead of connecting from configuration.
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    async fn cluster(&self, config: &ClusterConfig) -> Result<Arc<dyn ClusterApi>, JobError> {
        match &self.cluster {
            Some(cluster) => Ok(Arc::clone(cluster)),
            None => Ok(Arc::new(KubeCluster::connect(config).await?)),
        }
    }
}

#[async_trait]
impl JobBackend for KubernetesBackend {
    async fn start(
        &self,
        docker_image: &str,
        group: &JobGroup,
        config: &ClusterConfig,
        requestor_user_id: &str,
    ) -> Result<(), JobError> {
        group.validate()?;

        let spec = BatchJobSpec::from_group(docker_image, group, config, requestor_user_id);
        let manifest = build_job_manifest(&spec)?;
        let cluster = self.cluster(config).await?;

        let namespace = spec.tier.namespace.clone();
        let job = spec.name.clone();
        tracing::info!(
            job_group_id = %group.job_group_id,
            node_count = group.node_count,
            "Waiting for pods"
        );

        let outcome = spawn_supervisor(cluster, spec, manifest, self.poll_interval)
            .wait(|message| {
                tracing::info!(namespace = %namespace, job = %job, status = message, "Job status");
            })
            .await;

        match outcome {
            Ok(state) => {
                tracing::info!(
                    job = %job,
                    state = state.as_str(),
                    "Kubernetes pods reported complete"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(job = %job, error = %e, "Job error");
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

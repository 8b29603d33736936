use quant_cloud::ClusterError;
use quant_core::error::CoreError;
use quant_core::status::ClusterJobStatus;

/// Errors returned by a [`JobBackend`](crate::backend::JobBackend).
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Unknown job backend '{0}'. Must be one of: docker, kubernetes, null")]
    UnknownBackend(String),

    #[error("Missing storage credentials: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("Invalid job group: {0}")]
    InvalidGroup(String),

    #[error("Failed to serialize job config: {0}")]
    Serialization(String),

    #[error("Job create failed for: {job_id}. namespace: {namespace}, count: {node_count}. Error: {message}")]
    Submission {
        job_id: String,
        namespace: String,
        node_count: u32,
        message: String,
    },

    #[error(
        "Failed to get job status for: {job_id}. namespace: {namespace}, count: {node_count}, last seen: {}. Error: {message}",
        last_seen(.last_status)
    )]
    StatusPoll {
        job_id: String,
        namespace: String,
        node_count: u32,
        /// Counts from the last successful poll, `None` if none succeeded.
        last_status: Option<ClusterJobStatus>,
        message: String,
    },

    #[error("Timed out monitoring job {namespace}/{job_id}, {failed} failed nodes, {succeeded} succeeded nodes, {active} active nodes")]
    Timeout {
        namespace: String,
        job_id: String,
        succeeded: u32,
        failed: u32,
        active: u32,
    },

    #[error("Job group {job_group_id}: {failed} of {total} nodes failed")]
    NodesFailed {
        job_group_id: String,
        failed: usize,
        total: usize,
    },

    #[error("Job supervisor stopped unexpectedly: {0}")]
    Supervisor(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

fn last_seen(status: &Option<ClusterJobStatus>) -> String {
    match status {
        Some(s) => format!(
            "{} failed nodes, {} succeeded nodes, {} active nodes",
            s.failed, s.succeeded, s.active
        ),
        None => "no status yet".to_string(),
    }
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::InvalidGroup(msg),
            other => Self::Serialization(other.to_string()),
        }
    }
}

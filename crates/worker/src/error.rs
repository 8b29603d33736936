/// Why a worker run failed.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("JOB_CONFIG env var not set")]
    ConfigMissing,

    #[error("Failed to parse env var JOB_CONFIG: {0}")]
    ConfigParse(String),

    #[error("Invalid node index '{0}'")]
    InvalidNodeIndex(String),

    #[error("No command specified")]
    NoCommand,

    #[error("Failed to download {remote}: {reason}")]
    Download { remote: String, reason: String },

    #[error("Job {job_id} failed: {reason}")]
    CommandFailed { job_id: String, reason: String },

    #[error("Job {job_id} failed to generate/upload output files: {}", .files.join(", "))]
    OutputFiles { job_id: String, files: Vec<String> },
}

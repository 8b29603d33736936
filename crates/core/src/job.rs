//! Job descriptors and job groups.
//!
//! A [`NodeJobDescriptor`] is the unit of work for one worker node: which
//! files to download, which command to run and which outputs to upload.
//! A [`JobGroup`] is a template descriptor fanned out over `node_count`
//! nodes.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Worker environment contract
// ---------------------------------------------------------------------------

/// Environment variable carrying the serialized [`NodeJobDescriptor`].
pub const JOB_CONFIG_ENV_VAR: &str = "JOB_CONFIG";

/// Environment variable carrying the node ordinal. Set by the cluster in
/// indexed-completion mode, and by the local container backend.
pub const NODE_INDEX_ENV_VAR: &str = "JOB_COMPLETION_INDEX";

/// Command that skips execution entirely. Lets tests exercise downloads
/// and uploads without a platform-specific executable.
pub const NOOP_COMMAND: &str = "noop";

/// Output `local_path` meaning "upload the captured process output".
pub const STDOUT_SENTINEL: &str = "stdout";

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A file mapping between remote object storage and the worker's disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobFilePath {
    pub remote_bucket: String,
    pub remote_path: String,
    pub local_path: String,
}

impl JobFilePath {
    pub fn new(
        remote_bucket: impl Into<String>,
        remote_path: impl Into<String>,
        local_path: impl Into<String>,
    ) -> Self {
        Self {
            remote_bucket: remote_bucket.into(),
            remote_path: remote_path.into(),
            local_path: local_path.into(),
        }
    }

    /// Whether this output captures process output instead of a file.
    pub fn is_stdout(&self) -> bool {
        self.local_path == STDOUT_SENTINEL
    }

    /// `s3://bucket/path` form used in log lines and errors.
    pub fn remote_uri(&self) -> String {
        format!("s3://{}/{}", self.remote_bucket, self.remote_path)
    }
}

/// Everything one worker node needs to run its share of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeJobDescriptor {
    pub job_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub required_files: Vec<JobFilePath>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output_files: Vec<JobFilePath>,
}

impl NodeJobDescriptor {
    /// Serialize to the JSON form carried in [`JOB_CONFIG_ENV_VAR`].
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON form carried in [`JOB_CONFIG_ENV_VAR`].
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Lists written as `null` by other producers deserialize as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A templated group of `node_count` identical node jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobGroup {
    pub job_group_id: String,
    pub docker_image: String,
    #[serde(default)]
    pub fast_start: bool,
    pub node_count: u32,
    pub node_config: NodeJobDescriptor,
}

impl JobGroup {
    /// Check the invariants a backend relies on before dispatching.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.job_group_id.trim().is_empty() {
            return Err(CoreError::Validation(
                "Job group id must not be empty".to_string(),
            ));
        }
        if self.node_count < 1 {
            return Err(CoreError::Validation(format!(
                "Job group {} must have at least one node",
                self.job_group_id
            )));
        }
        Ok(())
    }

    /// Job id assigned to the node with the given ordinal.
    pub fn node_job_id(&self, node_index: u32) -> String {
        format!("{}-{node_index}", self.job_group_id)
    }

    /// An independent copy of the template for node `node_index`.
    ///
    /// Every list is owned by the returned descriptor, so modifying it
    /// never affects the template or any sibling.
    pub fn node_config(&self, node_index: u32) -> NodeJobDescriptor {
        NodeJobDescriptor {
            job_id: self.node_job_id(node_index),
            ..self.node_config.clone()
        }
    }

    /// All per-node descriptors, in ordinal order.
    pub fn node_configs(&self) -> impl Iterator<Item = NodeJobDescriptor> + '_ {
        (0..self.node_count).map(|i| self.node_config(i))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Worker runtime.
//!
//! Every container or pod of a job group runs [`WorkerRuntime::run_from_env`]
//! once. The run is strictly sequential:
//!
//! 1. read the descriptor from `JOB_CONFIG`;
//! 2. download every required file, stopping at the first failure;
//! 3. run the command (skipped for `noop`), capturing its output;
//! 4. upload every output file, continuing past failures, then report the
//!    ones that failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quant_core::estimation::shard_name;
use quant_core::job::{
    JobFilePath, NodeJobDescriptor, JOB_CONFIG_ENV_VAR, NODE_INDEX_ENV_VAR, NOOP_COMMAND,
};
use quant_core::process::run_process;
use quant_core::storage::ObjectStore;
use tokio::process::Command;

use crate::error::RunnerError;

/// Token in descriptor paths and args replaced by the node's shard name.
pub const SHARD_TOKEN: &str = "{shard}";

// ---------------------------------------------------------------------------
// Descriptor loading
// ---------------------------------------------------------------------------

/// Read and parse the descriptor through `lookup`.
///
/// When the node index variable is present, `{shard}` in args and file
/// paths is replaced by this node's shard name (`node00001` for index 0).
pub fn load_descriptor<F>(lookup: F) -> Result<NodeJobDescriptor, RunnerError>
where
    F: Fn(&str) -> Option<String>,
{
    let json = lookup(JOB_CONFIG_ENV_VAR)
        .filter(|v| !v.is_empty())
        .ok_or(RunnerError::ConfigMissing)?;
    let descriptor =
        NodeJobDescriptor::from_json(&json).map_err(|e| RunnerError::ConfigParse(e.to_string()))?;

    match lookup(NODE_INDEX_ENV_VAR).filter(|v| !v.trim().is_empty()) {
        Some(raw) => {
            let index: u32 = raw
                .trim()
                .parse()
                .map_err(|_| RunnerError::InvalidNodeIndex(raw.clone()))?;
            Ok(apply_shard(descriptor, &shard_name(index)))
        }
        None => Ok(descriptor),
    }
}

/// Replace [`SHARD_TOKEN`] everywhere it can appear in `descriptor`.
pub fn apply_shard(mut descriptor: NodeJobDescriptor, shard: &str) -> NodeJobDescriptor {
    let sub = |s: &mut String| {
        if s.contains(SHARD_TOKEN) {
            *s = s.replace(SHARD_TOKEN, shard);
        }
    };

    descriptor.args.iter_mut().for_each(sub);
    for file in descriptor
        .required_files
        .iter_mut()
        .chain(descriptor.output_files.iter_mut())
    {
        sub(&mut file.remote_path);
        sub(&mut file.local_path);
    }
    descriptor
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Runs one node's job against an object store.
pub struct WorkerRuntime {
    store: Arc<dyn ObjectStore>,
    work_dir: PathBuf,
}

impl WorkerRuntime {
    /// Relative local paths resolve against the process working directory.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            work_dir: PathBuf::from("."),
        }
    }

    /// Resolve relative local paths, and run the command, in `dir`.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Load the descriptor from the process environment and run it.
    pub async fn run_from_env(&self) -> Result<(), RunnerError> {
        self.run_with_lookup(|key| std::env::var(key).ok()).await
    }

    /// Load the descriptor through `lookup` and run it.
    pub async fn run_with_lookup<F>(&self, lookup: F) -> Result<(), RunnerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let descriptor = load_descriptor(lookup)?;
        self.run_job(&descriptor).await
    }

    /// Download inputs, run the command and upload outputs.
    pub async fn run_job(&self, job: &NodeJobDescriptor) -> Result<(), RunnerError> {
        tracing::info!(job_id = %job.job_id, "Preparing job");
        tracing::debug!(job_id = %job.job_id, config = ?job, "Job config");

        if job.command.is_empty() {
            return Err(RunnerError::NoCommand);
        }

        tracing::info!(count = job.required_files.len(), "Downloading files");
        for file in &job.required_files {
            self.download(file).await?;
        }

        let (output, elapsed) = self.execute(job).await?;
        tracing::info!(
            job_id = %job.job_id,
            runtime_sec = elapsed.as_secs(),
            "Job runtime"
        );

        let mut failed = Vec::new();
        for file in &job.output_files {
            if file.is_stdout() {
                // Stdout upload failures are logged only.
                match self
                    .store
                    .write_object(&file.remote_bucket, &file.remote_path, output.clone())
                    .await
                {
                    Ok(()) => tracing::info!(remote = %file.remote_uri(), "Uploaded stdout log"),
                    Err(e) => tracing::error!(
                        remote = %file.remote_uri(),
                        error = %e,
                        "Failed to upload stdout log"
                    ),
                }
                continue;
            }

            if let Err(e) = self.upload(file).await {
                tracing::error!(
                    job_id = %job.job_id,
                    local = %file.local_path,
                    error = %e,
                    "Failed to upload output file"
                );
                failed.push(file.local_path.clone());
            }
        }

        if !failed.is_empty() {
            return Err(RunnerError::OutputFiles {
                job_id: job.job_id.clone(),
                files: failed,
            });
        }

        tracing::info!(job_id = %job.job_id, "Job complete");
        Ok(())
    }

    fn local_path(&self, local: &str) -> PathBuf {
        let path = Path::new(local);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    async fn download(&self, file: &JobFilePath) -> Result<(), RunnerError> {
        let fail = |reason: String| RunnerError::Download {
            remote: file.remote_uri(),
            reason,
        };

        tracing::info!(remote = %file.remote_uri(), local = %file.local_path, "Download");

        if file.remote_bucket.is_empty() {
            return Err(fail("No bucket specified".to_string()));
        }
        if file.remote_path.is_empty() {
            return Err(fail("No remote path specified".to_string()));
        }
        if file.local_path.is_empty() {
            return Err(fail("No local path specified".to_string()));
        }

        let local = self.local_path(&file.local_path);
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                fail(format!("Failed to create local path {}: {e}", parent.display()))
            })?;
        }

        let data = self
            .store
            .read_object(&file.remote_bucket, &file.remote_path)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    fail("Not found".to_string())
                } else {
                    fail(e.to_string())
                }
            })?;
        tracing::debug!(bytes = data.len(), "Downloaded");

        tokio::fs::write(&local, &data).await.map_err(|e| {
            fail(format!(
                "Failed to write {} byte local file {}: {e}",
                data.len(),
                local.display()
            ))
        })?;
        Ok(())
    }

    /// Run the command. Returns the combined output and the runtime.
    async fn execute(&self, job: &NodeJobDescriptor) -> Result<(Vec<u8>, Duration), RunnerError> {
        if job.command == NOOP_COMMAND {
            tracing::info!(job_id = %job.job_id, "No-op command, skipping execution");
            return Ok((Vec::new(), Duration::ZERO));
        }

        tracing::debug!(command = %job.command, args = ?job.args, "Starting command");

        let mut cmd = Command::new(&job.command);
        cmd.args(&job.args).current_dir(&self.work_dir);

        let output = run_process(&mut cmd, None)
            .await
            .map_err(|e| RunnerError::CommandFailed {
                job_id: job.job_id.clone(),
                reason: e.to_string(),
            })?;

        if !output.success() {
            tracing::error!(
                job_id = %job.job_id,
                exit_code = output.exit_code,
                output = %output.combined_lossy(),
                "Command failed"
            );
            return Err(RunnerError::CommandFailed {
                job_id: job.job_id.clone(),
                reason: format!("exit status {}", output.exit_code),
            });
        }

        Ok((output.combined, output.elapsed))
    }

    async fn upload(&self, file: &JobFilePath) -> Result<(), String> {
        let local = self.local_path(&file.local_path);
        let data = tokio::fs::read(&local)
            .await
            .map_err(|e| format!("did not generate expected output file: {e}"))?;

        tracing::info!(local = %file.local_path, remote = %file.remote_uri(), "Upload");
        self.store
            .write_object(&file.remote_bucket, &file.remote_path, data)
            .await
            .map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

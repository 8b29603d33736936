//! Local container backend.
//!
//! Runs one `docker run --rm` per node on the local machine, all at once,
//! and waits for every one of them. Used for development and for running
//! small jobs without a cluster.

use async_trait::async_trait;
use futures::future::join_all;
use quant_core::config::ClusterConfig;
use quant_core::job::{JobGroup, JOB_CONFIG_ENV_VAR, NODE_INDEX_ENV_VAR};
use quant_core::process::run_process;
use tokio::process::Command;
use tracing::Instrument;

use crate::backend::JobBackend;
use crate::credentials::StorageCredentials;
use crate::error::JobError;

const DEFAULT_DOCKER_COMMAND: &str = "docker";

/// Environment of one container launch.
#[derive(Debug, Clone)]
struct NodeLaunch {
    node_index: u32,
    job_id: String,
    env: Vec<(String, String)>,
}

/// Runs every node as a local container.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    program: String,
    leading_args: Vec<String>,
    credentials: Option<StorageCredentials>,
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerBackend {
    pub fn new() -> Self {
        Self {
            program: DEFAULT_DOCKER_COMMAND.to_string(),
            leading_args: Vec::new(),
            credentials: None,
        }
    }

    /// Replace the `docker` executable. `leading_args` go before `run`.
    pub fn with_docker_command<I, S>(mut self, program: impl Into<String>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.leading_args = leading_args.into_iter().map(Into::into).collect();
        self
    }

    /// Use fixed credentials instead of reading them from the environment.
    pub fn with_credentials(mut self, credentials: StorageCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn resolve_credentials(&self) -> Result<StorageCredentials, JobError> {
        match &self.credentials {
            Some(credentials) => {
                credentials.validate()?;
                Ok(credentials.clone())
            }
            None => StorageCredentials::from_env(),
        }
    }

    /// Arguments after the program: `run --rm -e NAME... image`.
    ///
    /// Variables are passed by name only so their values come from the
    /// child's environment and never appear on a command line.
    fn run_args(&self, docker_image: &str, env: &[(String, String)]) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push("run".to_string());
        args.push("--rm".to_string());
        for (name, _) in env {
            args.push("-e".to_string());
            args.push(name.clone());
        }
        args.push(docker_image.to_string());
        args
    }

    async fn run_node(&self, docker_image: &str, launch: NodeLaunch) -> bool {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.run_args(docker_image, &launch.env));
        cmd.envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        match run_process(&mut cmd, None).await {
            Ok(output) if output.success() => {
                tracing::info!(
                    job_id = %launch.job_id,
                    node_index = launch.node_index,
                    elapsed_ms = output.elapsed.as_millis() as u64,
                    "Job ran successfully"
                );
                tracing::debug!(job_id = %launch.job_id, output = %output.combined_lossy());
                true
            }
            Ok(output) => {
                tracing::error!(
                    job_id = %launch.job_id,
                    node_index = launch.node_index,
                    exit_code = output.exit_code,
                    output = %output.combined_lossy(),
                    "Running job in docker failed"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    job_id = %launch.job_id,
                    node_index = launch.node_index,
                    error = %e,
                    "Running job in docker failed"
                );
                false
            }
        }
    }
}

#[async_trait]
impl JobBackend for DockerBackend {
    async fn start(
        &self,
        docker_image: &str,
        group: &JobGroup,
        _config: &ClusterConfig,
        _requestor_user_id: &str,
    ) -> Result<(), JobError> {
        group.validate()?;
        let credentials = self.resolve_credentials().map_err(|e| {
            tracing::error!(error = %e, "No storage credentials for docker jobs");
            e
        })?;

        let span = tracing::info_span!("docker_job", job_group_id = %group.job_group_id);

        // Serialize every descriptor before launching anything so a bad
        // group never leaves some containers running.
        let launches = group
            .node_configs()
            .enumerate()
            .map(|(i, node_config)| -> Result<NodeLaunch, JobError> {
                let mut env: Vec<(String, String)> = credentials
                    .env_pairs()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                env.push((JOB_CONFIG_ENV_VAR.to_string(), node_config.to_json()?));
                env.push((NODE_INDEX_ENV_VAR.to_string(), i.to_string()));
                Ok(NodeLaunch {
                    node_index: i as u32,
                    job_id: node_config.job_id,
                    env,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total = launches.len();
        async {
            tracing::info!(node_count = total, image = docker_image, "Starting docker nodes");

            let handles: Vec<_> = launches
                .into_iter()
                .map(|launch| {
                    let backend = self.clone();
                    let image = docker_image.to_string();
                    tokio::spawn(
                        async move { backend.run_node(&image, launch).await }
                            .in_current_span(),
                    )
                })
                .collect();

            let failed = join_all(handles)
                .await
                .into_iter()
                .filter(|joined| !matches!(joined, Ok(true)))
                .count();

            if failed > 0 {
                tracing::error!(failed, total, "Docker nodes failed");
                return Err(JobError::NodesFailed {
                    job_group_id: group.job_group_id.clone(),
                    failed,
                    total,
                });
            }

            tracing::info!(total, "All docker nodes completed");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use quant_core::job::NodeJobDescriptor;

    use super::*;

    fn credentials() -> StorageCredentials {
        StorageCredentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            region: "us-east-1".to_string(),
        }
    }

    fn group(node_count: u32) -> JobGroup {
        JobGroup {
            job_group_id: "grp".to_string(),
            docker_image: "img:test".to_string(),
            fast_start: false,
            node_count,
            node_config: NodeJobDescriptor {
                command: "noop".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn run_args_pass_variables_by_name() {
        let backend = DockerBackend::new();
        let env = vec![
            ("AWS_ACCESS_KEY_ID".to_string(), "AKIA".to_string()),
            ("JOB_CONFIG".to_string(), "{}".to_string()),
        ];
        assert_eq!(
            backend.run_args("img:1", &env),
            vec!["run", "--rm", "-e", "AWS_ACCESS_KEY_ID", "-e", "JOB_CONFIG", "img:1"]
        );
    }

    #[tokio::test]
    async fn missing_credentials_start_nothing() {
        // `false` would turn any launched node into NodesFailed.
        let backend = DockerBackend::new()
            .with_docker_command("false", Vec::<String>::new())
            .with_credentials(StorageCredentials {
                region: String::new(),
                ..credentials()
            });
        let err = backend
            .start("img:test", &group(2), &ClusterConfig::default(), "user")
            .await
            .unwrap_err();
        assert_matches!(
            err,
            JobError::MissingCredentials(ref names) if names == &vec!["AWS_DEFAULT_REGION"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn every_node_succeeds() {
        let backend = DockerBackend::new()
            .with_docker_command("true", Vec::<String>::new())
            .with_credentials(credentials());
        let result = backend
            .start("img:test", &group(3), &ClusterConfig::default(), "user")
            .await;
        assert!(result.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn one_failed_node_does_not_stop_siblings() {
        // Fails node 1 only, and only if the environment reached the child.
        let script = r#"[ "$JOB_COMPLETION_INDEX" = "1" ] && exit 1; [ -n "$JOB_CONFIG" ] || exit 2; exit 0"#;
        let backend = DockerBackend::new()
            .with_docker_command("sh", ["-c", script, "docker"])
            .with_credentials(credentials());

        let err = backend
            .start("img:test", &group(4), &ClusterConfig::default(), "user")
            .await
            .unwrap_err();
        assert_matches!(err, JobError::NodesFailed { failed: 1, total: 4, .. });
        assert_eq!(err.to_string(), "Job group grp: 1 of 4 nodes failed");
    }

    #[tokio::test]
    async fn unlaunchable_program_counts_as_failure() {
        let backend = DockerBackend::new()
            .with_docker_command("not-a-docker-binary-4711", Vec::<String>::new())
            .with_credentials(credentials());
        let err = backend
            .start("img:test", &group(2), &ClusterConfig::default(), "user")
            .await
            .unwrap_err();
        assert_matches!(err, JobError::NodesFailed { failed: 2, total: 2, .. });
    }

    #[tokio::test]
    async fn invalid_group_is_rejected() {
        let backend = DockerBackend::new().with_credentials(credentials());
        let err = backend
            .start("img:test", &group(0), &ClusterConfig::default(), "user")
            .await
            .unwrap_err();
        assert_matches!(err, JobError::InvalidGroup(_));
    }
}

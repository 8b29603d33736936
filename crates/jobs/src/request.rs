//! Job group requests with an optional node count.
//!
//! A request either fixes `NodeCount` or describes the problem size in
//! `Sizing`, in which case the node count is planned from the cluster
//! configuration (`CORES_PER_NODE`, `MAX_QUANT_NODES`, `NODE_COUNT_OVERRIDE`).

use quant_core::config::ClusterConfig;
use quant_core::estimation::{plan_node_count, EstimatorInputs};
use quant_core::job::{JobGroup, NodeJobDescriptor};
use serde::Deserialize;

use crate::error::JobError;

/// Problem size used to plan the node count.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestSizing {
    pub spectra_count: u32,
    pub element_count: u32,
    pub desired_runtime_sec: u32,
    /// `false` for commands that cannot be split across nodes.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_parallel() -> bool {
    true
}

/// A [`JobGroup`] whose node count may still have to be planned.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobRequest {
    pub job_group_id: String,
    pub docker_image: String,
    #[serde(default)]
    pub fast_start: bool,
    #[serde(default)]
    pub node_count: Option<u32>,
    #[serde(default)]
    pub sizing: Option<RequestSizing>,
    pub node_config: NodeJobDescriptor,
}

impl JobRequest {
    /// Resolve the node count and build the group.
    ///
    /// A non-zero `NodeCount` is used as given. Otherwise `Sizing` is run
    /// through [`plan_node_count`] with the configured cores, node limit
    /// and override.
    pub fn into_group(self, config: &ClusterConfig) -> Result<JobGroup, JobError> {
        let node_count = match (self.node_count, &self.sizing) {
            (Some(count), _) if count > 0 => count,
            (_, Some(sizing)) => {
                let inputs = EstimatorInputs {
                    spectra_count: sizing.spectra_count,
                    element_count: sizing.element_count,
                    desired_runtime_sec: sizing.desired_runtime_sec,
                    cores_per_node: config.cores_per_node,
                    max_nodes: config.max_quant_nodes,
                };
                let planned =
                    plan_node_count(&inputs, config.node_count_override, sizing.parallel);
                tracing::info!(
                    job_group_id = %self.job_group_id,
                    spectra_count = sizing.spectra_count,
                    element_count = sizing.element_count,
                    node_count = planned,
                    "Planned node count"
                );
                planned
            }
            _ => {
                return Err(JobError::InvalidGroup(format!(
                    "Job group {} needs NodeCount or Sizing",
                    self.job_group_id
                )))
            }
        };

        let group = JobGroup {
            job_group_id: self.job_group_id,
            docker_image: self.docker_image,
            fast_start: self.fast_start,
            node_count,
            node_config: self.node_config,
        };
        group.validate()?;
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn config() -> ClusterConfig {
        ClusterConfig {
            cores_per_node: 8,
            max_quant_nodes: 50,
            node_count_override: 0,
            ..ClusterConfig::default()
        }
    }

    fn request(node_count: Option<u32>, sizing: Option<RequestSizing>) -> JobRequest {
        JobRequest {
            job_group_id: "grp".to_string(),
            docker_image: "img:1".to_string(),
            fast_start: false,
            node_count,
            sizing,
            node_config: NodeJobDescriptor {
                command: "noop".to_string(),
                ..Default::default()
            },
        }
    }

    fn sizing(parallel: bool) -> RequestSizing {
        RequestSizing {
            spectra_count: 8070,
            element_count: 3,
            desired_runtime_sec: 202,
            parallel,
        }
    }

    #[test]
    fn explicit_node_count_wins() {
        let group = request(Some(4), Some(sizing(true))).into_group(&config()).unwrap();
        assert_eq!(group.node_count, 4);
    }

    #[test]
    fn sizing_uses_configured_cores_and_limit() {
        let group = request(None, Some(sizing(true))).into_group(&config()).unwrap();
        assert_eq!(group.node_count, 10);

        let capped = ClusterConfig {
            max_quant_nodes: 6,
            ..config()
        };
        let group = request(None, Some(sizing(true))).into_group(&capped).unwrap();
        assert_eq!(group.node_count, 6);
    }

    #[test]
    fn override_replaces_the_estimate() {
        let overridden = ClusterConfig {
            node_count_override: 3,
            ..config()
        };
        let group = request(Some(0), Some(sizing(true))).into_group(&overridden).unwrap();
        assert_eq!(group.node_count, 3);
    }

    #[test]
    fn serial_command_runs_on_one_node() {
        let group = request(None, Some(sizing(false))).into_group(&config()).unwrap();
        assert_eq!(group.node_count, 1);
    }

    #[test]
    fn neither_count_nor_sizing_is_rejected() {
        let err = request(None, None).into_group(&config()).unwrap_err();
        assert_matches!(
            err,
            JobError::InvalidGroup(ref msg) if msg.contains("NodeCount or Sizing")
        );
    }

    #[test]
    fn parses_request_without_node_count() {
        let json = r#"{
            "JobGroupId": "grp",
            "DockerImage": "img:1",
            "Sizing": {"SpectraCount": 8070, "ElementCount": 9, "DesiredRuntimeSec": 203},
            "NodeConfig": {"JobId": "", "Command": "noop"}
        }"#;
        let req: JobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.node_count, None);
        assert!(req.sizing.as_ref().unwrap().parallel);
        assert_eq!(req.into_group(&config()).unwrap().node_count, 20);
    }
}

//! Batch Job manifest for a job group.
//!
//! One indexed-completion `Job` runs every node of a group: Kubernetes
//! starts `node_count` pods and gives each its ordinal in
//! `JOB_COMPLETION_INDEX`. All pods receive the same template descriptor
//! in `JOB_CONFIG`.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use quant_core::config::ClusterConfig;
use quant_core::error::CoreError;
use quant_core::job::{JobGroup, NodeJobDescriptor, JOB_CONFIG_ENV_VAR};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Application name used for the container and the component labels.
pub const APPLICATION_NAME: &str = "job-runner";

/// Value of the `app.kubernetes.io/managed-by` label.
pub const MANAGED_BY: &str = "pixlise";

/// Registry credentials secret referenced by every pod.
pub const IMAGE_PULL_SECRET: &str = "api-auth";

/// Seconds a finished Job is kept before the cluster garbage-collects it.
pub const TTL_AFTER_FINISHED_SEC: i32 = 5 * 60;

/// CPU ceiling for every pod, whatever its tier requested.
pub const CPU_LIMIT: &str = "3500m";

const DEFAULT_SERVICE_ACCOUNT: &str = "piquant-map";
const DEFAULT_CPU_REQUEST: &str = "3500m";
const FAST_START_SERVICE_ACCOUNT: &str = "pixlise-api";
const FAST_START_CPU_REQUEST: &str = "250m";

// ---------------------------------------------------------------------------
// Cost tier
// ---------------------------------------------------------------------------

/// Where a job runs and how much CPU each of its pods reserves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostTier {
    pub namespace: String,
    pub service_account: String,
    pub cpu_request: String,
}

impl CostTier {
    /// Pick the tier for a job.
    ///
    /// Regular jobs reserve a full node's CPU in the quant namespace.
    /// Fast-start jobs land on already-warm nodes and reserve little CPU.
    /// They only move to the hot namespace when it is configured to be a
    /// different namespace.
    pub fn select(fast_start: bool, config: &ClusterConfig) -> Self {
        let mut tier = Self {
            namespace: config.quant_namespace.clone(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            cpu_request: DEFAULT_CPU_REQUEST.to_string(),
        };

        if fast_start {
            tier.cpu_request = FAST_START_CPU_REQUEST.to_string();
            if config.hot_quant_namespace != config.quant_namespace {
                tier.namespace = config.hot_quant_namespace.clone();
                tier.service_account = FAST_START_SERVICE_ACCOUNT.to_string();
            }
        }

        tier
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// Everything needed to render the batch Job for one job group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJobSpec {
    /// Job resource name, `job-{job_group_id}`.
    pub name: String,
    pub job_group_id: String,
    pub docker_image: String,
    pub node_count: u32,
    pub tier: CostTier,
    /// Requestor id with characters Kubernetes rejects in labels replaced.
    pub owner: String,
    pub environment_name: String,
    /// Deadline for the whole Job, in seconds.
    pub active_deadline_sec: u32,
    /// Descriptor shared by every pod; its job id is the group id.
    pub node_config: NodeJobDescriptor,
}

impl BatchJobSpec {
    pub fn from_group(
        docker_image: &str,
        group: &JobGroup,
        config: &ClusterConfig,
        requestor_user_id: &str,
    ) -> Self {
        let mut node_config = group.node_config.clone();
        node_config.job_id = group.job_group_id.clone();

        Self {
            name: job_name(&group.job_group_id),
            job_group_id: group.job_group_id.clone(),
            docker_image: docker_image.to_string(),
            node_count: group.node_count,
            tier: CostTier::select(group.fast_start, config),
            owner: sanitize_owner(requestor_user_id),
            environment_name: config.environment_name.clone(),
            active_deadline_sec: config.node_max_runtime_sec,
            node_config,
        }
    }
}

/// Cluster resource name for a job group.
pub fn job_name(job_group_id: &str) -> String {
    format!("job-{job_group_id}")
}

/// Kubernetes rejects `|` in label values; identity provider ids such as
/// `auth0|abc` contain one.
pub fn sanitize_owner(requestor_user_id: &str) -> String {
    requestor_user_id.replace('|', "_")
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Render `spec` as a `batch/v1` Job.
pub fn build_job_manifest(spec: &BatchJobSpec) -> Result<Job, CoreError> {
    let job_config = spec.node_config.to_json()?;
    let node_count = i32::try_from(spec.node_count).map_err(|_| {
        CoreError::Validation(format!("Node count {} is too large", spec.node_count))
    })?;

    let labels: BTreeMap<String, String> = [
        ("app.kubernetes.io/component", APPLICATION_NAME.to_string()),
        ("app.kubernetes.io/name", spec.job_group_id.clone()),
        ("app.kubernetes.io/instance", spec.name.clone()),
        ("app.kubernetes.io/managed-by", MANAGED_BY.to_string()),
        ("pixlise.org/application", APPLICATION_NAME.to_string()),
        ("pixlise.org/environment", spec.environment_name.clone()),
        ("pixlise.org/owner", spec.owner.clone()),
        ("pixlise.org/jobid", spec.name.clone()),
        ("pixlise.org/numberofpods", spec.node_count.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let container = Container {
        name: APPLICATION_NAME.to_string(),
        image: Some(spec.docker_image.clone()),
        image_pull_policy: Some("Always".to_string()),
        resources: Some(ResourceRequirements {
            requests: Some(cpu(&spec.tier.cpu_request)),
            limits: Some(cpu(CPU_LIMIT)),
            ..Default::default()
        }),
        env: Some(vec![
            env_var(JOB_CONFIG_ENV_VAR, job_config),
            env_var("PYTHONUNBUFFERED", "TRUE".to_string()),
        ]),
        ..Default::default()
    };

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.tier.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(JobSpec {
            completions: Some(node_count),
            parallelism: Some(node_count),
            completion_mode: Some("Indexed".to_string()),
            ttl_seconds_after_finished: Some(TTL_AFTER_FINISHED_SEC),
            active_deadline_seconds: Some(i64::from(spec.active_deadline_sec)),
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    image_pull_secrets: Some(vec![LocalObjectReference {
                        name: IMAGE_PULL_SECRET.to_string(),
                    }]),
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(spec.tier.service_account.clone()),
                    containers: vec![container],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        status: None,
    })
}

fn cpu(amount: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("cpu".to_string(), Quantity(amount.to_string()))])
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Orchestration configuration loaded from environment variables.

use crate::error::CoreError;

/// `kubernetes_location` value selecting a kubeconfig file instead of the
/// in-cluster service account.
pub const KUBERNETES_LOCATION_EXTERNAL: &str = "external";

/// Settings shared by every job backend.
///
/// All fields have defaults suitable for local development. In a deployed
/// environment, override via environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Deployment name recorded in resource labels (default: `local`).
    pub environment_name: String,
    /// `external` to read `kubeconfig_path`, anything else for in-cluster.
    pub kubernetes_location: String,
    /// Path of the kubeconfig used when running outside the cluster.
    pub kubeconfig_path: String,
    /// Namespace for regular (full CPU) jobs.
    pub quant_namespace: String,
    /// Namespace for fast-start jobs. Only used when it differs from
    /// `quant_namespace`.
    pub hot_quant_namespace: String,
    /// Deadline for a whole batch job, in seconds.
    pub node_max_runtime_sec: u32,
    /// Cores available to one node, fed to the node count estimator.
    pub cores_per_node: u32,
    /// Upper bound for the node count estimator.
    pub max_quant_nodes: u32,
    /// When greater than zero, replaces the estimated node count.
    pub node_count_override: u32,
    /// Backend name passed to the backend factory.
    pub quant_executor: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            environment_name: "local".into(),
            kubernetes_location: "internal".into(),
            kubeconfig_path: default_kubeconfig_path(|key: &str| std::env::var(key).ok()),
            quant_namespace: "piquant-map".into(),
            hot_quant_namespace: "piquant-map".into(),
            node_max_runtime_sec: 3600,
            cores_per_node: 8,
            max_quant_nodes: 50,
            node_count_override: 0,
            quant_executor: "kubernetes".into(),
        }
    }
}

impl ClusterConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `ENVIRONMENT_NAME`           | `local`                 |
    /// | `KUBERNETES_LOCATION`        | `internal`              |
    /// | `KUBECONFIG`                 | `$HOME/.kube/config`    |
    /// | `QUANT_NAMESPACE`            | `piquant-map`           |
    /// | `HOT_QUANT_NAMESPACE`        | value of `QUANT_NAMESPACE` |
    /// | `QUANT_NODE_MAX_RUNTIME_SEC` | `3600`                  |
    /// | `CORES_PER_NODE`             | `8`                     |
    /// | `MAX_QUANT_NODES`            | `50`                    |
    /// | `NODE_COUNT_OVERRIDE`        | `0`                     |
    /// | `QUANT_EXECUTOR`             | `kubernetes`            |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let quant_namespace = get("QUANT_NAMESPACE", "piquant-map");
        let hot_quant_namespace = get("HOT_QUANT_NAMESPACE", &quant_namespace);

        Ok(Self {
            environment_name: get("ENVIRONMENT_NAME", "local"),
            kubernetes_location: get("KUBERNETES_LOCATION", "internal"),
            kubeconfig_path: get("KUBECONFIG", &default_kubeconfig_path(&lookup)),
            quant_namespace,
            hot_quant_namespace,
            node_max_runtime_sec: parse_u32(
                "QUANT_NODE_MAX_RUNTIME_SEC",
                &get("QUANT_NODE_MAX_RUNTIME_SEC", "3600"),
            )?,
            cores_per_node: parse_u32("CORES_PER_NODE", &get("CORES_PER_NODE", "8"))?,
            max_quant_nodes: parse_u32("MAX_QUANT_NODES", &get("MAX_QUANT_NODES", "50"))?,
            node_count_override: parse_u32(
                "NODE_COUNT_OVERRIDE",
                &get("NODE_COUNT_OVERRIDE", "0"),
            )?,
            quant_executor: get("QUANT_EXECUTOR", "kubernetes"),
        })
    }

    /// Whether the cluster client should be built from a kubeconfig file.
    pub fn is_external_cluster(&self) -> bool {
        self.kubernetes_location == KUBERNETES_LOCATION_EXTERNAL
    }
}

fn parse_u32(key: &'static str, value: &str) -> Result<u32, CoreError> {
    value.parse().map_err(|_| CoreError::Config {
        key,
        message: format!("'{value}' is not a non-negative integer"),
    })
}

fn default_kubeconfig_path<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("HOME")
        .or_else(|| lookup("USERPROFILE"))
        .map(|home| format!("{home}/.kube/config"))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = ClusterConfig::from_lookup(lookup_from(&[("HOME", "/home/quant")])).unwrap();
        assert_eq!(cfg.environment_name, "local");
        assert_eq!(cfg.quant_namespace, "piquant-map");
        assert_eq!(cfg.hot_quant_namespace, "piquant-map");
        assert_eq!(cfg.kubeconfig_path, "/home/quant/.kube/config");
        assert_eq!(cfg.node_max_runtime_sec, 3600);
        assert_eq!(cfg.cores_per_node, 8);
        assert_eq!(cfg.max_quant_nodes, 50);
        assert_eq!(cfg.node_count_override, 0);
        assert_eq!(cfg.quant_executor, "kubernetes");
        assert!(!cfg.is_external_cluster());
    }

    #[test]
    fn hot_namespace_defaults_to_quant_namespace() {
        let cfg =
            ClusterConfig::from_lookup(lookup_from(&[("QUANT_NAMESPACE", "quant-prod")])).unwrap();
        assert_eq!(cfg.hot_quant_namespace, "quant-prod");
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = ClusterConfig::from_lookup(lookup_from(&[
            ("ENVIRONMENT_NAME", "staging"),
            ("KUBERNETES_LOCATION", "external"),
            ("KUBECONFIG", "/etc/kube.yaml"),
            ("HOT_QUANT_NAMESPACE", "hot"),
            ("QUANT_NODE_MAX_RUNTIME_SEC", "600"),
            ("NODE_COUNT_OVERRIDE", "4"),
            ("QUANT_EXECUTOR", "docker"),
        ]))
        .unwrap();
        assert_eq!(cfg.environment_name, "staging");
        assert!(cfg.is_external_cluster());
        assert_eq!(cfg.kubeconfig_path, "/etc/kube.yaml");
        assert_eq!(cfg.hot_quant_namespace, "hot");
        assert_eq!(cfg.node_max_runtime_sec, 600);
        assert_eq!(cfg.node_count_override, 4);
        assert_eq!(cfg.quant_executor, "docker");
    }

    #[test]
    fn invalid_number_names_the_variable() {
        let err = ClusterConfig::from_lookup(lookup_from(&[("MAX_QUANT_NODES", "lots")]))
            .unwrap_err();
        assert_matches!(err, CoreError::Config { key: "MAX_QUANT_NODES", .. });
    }
}

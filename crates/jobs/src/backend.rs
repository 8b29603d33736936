//! Backend seam and factory.
//!
//! Callers depend only on [`JobBackend::start`]; which runtime executes
//! the nodes is chosen by name through [`get_backend`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use quant_core::config::ClusterConfig;
use quant_core::job::JobGroup;

use crate::docker::DockerBackend;
use crate::error::JobError;
use crate::kubernetes::KubernetesBackend;
use crate::null::NullBackend;

/// Runs every node of a [`JobGroup`] and resolves once the group reaches
/// a terminal outcome.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn start(
        &self,
        docker_image: &str,
        group: &JobGroup,
        config: &ClusterConfig,
        requestor_user_id: &str,
    ) -> Result<(), JobError>;
}

// ---------------------------------------------------------------------------
// Backend kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Docker,
    Kubernetes,
    Null,
}

impl BackendKind {
    pub const ALL: [Self; 3] = [Self::Docker, Self::Kubernetes, Self::Null];

    /// Configuration name, as accepted by [`get_backend`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Kubernetes => "kubernetes",
            Self::Null => "null",
        }
    }

    /// A fresh backend of this kind with default settings.
    pub fn create(self) -> Box<dyn JobBackend> {
        match self {
            Self::Docker => Box::new(DockerBackend::new()),
            Self::Kubernetes => Box::new(KubernetesBackend::new()),
            Self::Null => Box::new(NullBackend::new()),
        }
    }
}

impl FromStr for BackendKind {
    type Err = JobError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| JobError::UnknownBackend(name.to_string()))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Look up a backend by its configuration name.
pub fn get_backend(name: &str) -> Result<Box<dyn JobBackend>, JobError> {
    let kind: BackendKind = name.parse()?;
    tracing::debug!(backend = %kind, "Selected job backend");
    Ok(kind.create())
}

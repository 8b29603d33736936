//! Backend that runs nothing.
//!
//! Accepts any valid group and reports success immediately. Lets callers
//! exercise the submission path without containers or a cluster.

use std::sync::Mutex;

use async_trait::async_trait;
use quant_core::config::ClusterConfig;
use quant_core::job::JobGroup;

use crate::backend::JobBackend;
use crate::error::JobError;

#[derive(Debug, Default)]
pub struct NullBackend {
    started: Mutex<Vec<String>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job group ids passed to [`JobBackend::start`], in call order.
    pub fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl JobBackend for NullBackend {
    async fn start(
        &self,
        docker_image: &str,
        group: &JobGroup,
        _config: &ClusterConfig,
        requestor_user_id: &str,
    ) -> Result<(), JobError> {
        group.validate()?;
        tracing::info!(
            job_group_id = %group.job_group_id,
            node_count = group.node_count,
            image = docker_image,
            requestor = requestor_user_id,
            "Null backend: not starting job"
        );
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(group.job_group_id.clone());
        Ok(())
    }
}

//! `quant-jobs` -- submit a job group and wait for it to finish.
//!
//! Usage: `quant-jobs <job-group.json>`
//!
//! The file holds a serialized `JobRequest`: a job group whose `NodeCount`
//! may be left out in favour of `Sizing`, in which case it is planned from
//! the configured estimator settings. The backend is chosen by
//! `QUANT_EXECUTOR`; see `ClusterConfig::from_env` for the other settings.
//!
//! | Variable            | Required | Default | Description                      |
//! |---------------------|----------|---------|----------------------------------|
//! | `REQUESTOR_USER_ID` | no       | `local` | Owner recorded on cluster labels |

use anyhow::Context;
use quant_core::config::ClusterConfig;
use quant_jobs::{get_backend, JobRequest};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_REQUESTOR: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quant_jobs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: quant-jobs <job-group.json>")?;
    let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let request: JobRequest =
        serde_json::from_str(&json).with_context(|| format!("parsing job group in {path}"))?;

    let config = ClusterConfig::from_env()?;
    let group = request.into_group(&config)?;
    let requestor =
        std::env::var("REQUESTOR_USER_ID").unwrap_or_else(|_| DEFAULT_REQUESTOR.to_string());
    let backend = get_backend(&config.quant_executor)?;

    tracing::info!(
        job_group_id = %group.job_group_id,
        backend = %config.quant_executor,
        node_count = group.node_count,
        "Submitting job group"
    );

    backend
        .start(&group.docker_image, &group, &config, &requestor)
        .await?;

    tracing::info!(job_group_id = %group.job_group_id, "Job group finished");
    Ok(())
}

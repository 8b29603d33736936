//! `quant-worker` -- runs one node of a job group.
//!
//! Started inside every job container. Reads its descriptor from
//! `JOB_CONFIG` and, when set, its node ordinal from `JOB_COMPLETION_INDEX`.
//! Object storage credentials come from the standard AWS variables.
//! Exits non-zero when the job fails.

use std::process::ExitCode;
use std::sync::Arc;

use quant_cloud::S3ObjectStore;
use quant_worker::WorkerRuntime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quant_worker=info,quant_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(S3ObjectStore::from_env().await);
    let runtime = WorkerRuntime::new(store);

    match runtime.run_from_env().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Job failed");
            ExitCode::FAILURE
        }
    }
}

//! Integration tests for the worker runtime.
//!
//! Runs whole jobs against an in-memory object store with a temporary
//! working directory.

use std::sync::Arc;

use assert_matches::assert_matches;
use quant_core::job::{JobFilePath, NodeJobDescriptor, JOB_CONFIG_ENV_VAR, NODE_INDEX_ENV_VAR};
use quant_core::process::MAX_OUTPUT_BYTES;
use quant_core::storage::MemoryObjectStore;
use quant_worker::{RunnerError, WorkerRuntime};

fn setup() -> (Arc<MemoryObjectStore>, tempfile::TempDir, WorkerRuntime) {
    let store = Arc::new(MemoryObjectStore::new());
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = WorkerRuntime::new(store.clone()).with_work_dir(dir.path());
    (store, dir, runtime)
}

fn job(command: &str) -> NodeJobDescriptor {
    NodeJobDescriptor {
        job_id: "Job001".to_string(),
        command: command.to_string(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Test: validation
// ---------------------------------------------------------------------------

/// An empty command fails before any storage access.
#[tokio::test]
async fn empty_command_touches_nothing() {
    let (store, _dir, runtime) = setup();
    let mut descriptor = job("");
    descriptor.required_files = vec![JobFilePath::new("b", "in.txt", "in.txt")];
    descriptor.output_files = vec![JobFilePath::new("b", "log.txt", "stdout")];

    let err = runtime.run_job(&descriptor).await.unwrap_err();

    assert_matches!(err, RunnerError::NoCommand);
    assert_eq!(err.to_string(), "No command specified");
    assert!(store.reads().is_empty());
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn missing_config_env_var() {
    let (_store, _dir, runtime) = setup();
    let err = runtime.run_with_lookup(|_| None).await.unwrap_err();
    assert_eq!(err.to_string(), "JOB_CONFIG env var not set");
}

// ---------------------------------------------------------------------------
// Test: downloads
// ---------------------------------------------------------------------------

/// A missing required file stops the run before the command executes.
#[cfg(unix)]
#[tokio::test]
async fn missing_required_file_fails_before_command() {
    let (store, dir, runtime) = setup();
    store.insert("bucket", "present.txt", "here");

    let mut descriptor = job("sh");
    descriptor.args = vec!["-c".to_string(), "touch ran".to_string()];
    descriptor.required_files = vec![
        JobFilePath::new("bucket", "present.txt", "present.txt"),
        JobFilePath::new("bucket", "absent.txt", "absent.txt"),
        JobFilePath::new("bucket", "never.txt", "never.txt"),
    ];
    descriptor.output_files = vec![JobFilePath::new("bucket", "log.txt", "stdout")];

    let err = runtime.run_job(&descriptor).await.unwrap_err();

    assert_eq!(err.to_string(), "Failed to download s3://bucket/absent.txt: Not found");
    assert_eq!(store.reads().len(), 2);
    assert!(store.writes().is_empty());
    assert!(dir.path().join("present.txt").exists());
    assert!(!dir.path().join("ran").exists(), "command must not run");
}

#[tokio::test]
async fn empty_bucket_is_rejected() {
    let (store, _dir, runtime) = setup();
    let mut descriptor = job("noop");
    descriptor.required_files = vec![JobFilePath::new("", "x.txt", "x.txt")];

    let err = runtime.run_job(&descriptor).await.unwrap_err();
    assert_matches!(
        err,
        RunnerError::Download { ref reason, .. } if reason == "No bucket specified"
    );
    assert!(store.reads().is_empty());
}

/// Local parent directories are created on demand.
#[tokio::test]
async fn download_creates_local_directories() {
    let (store, dir, runtime) = setup();
    store.insert("bucket", "cfg/detector.msa", "calibration");

    let mut descriptor = job("noop");
    descriptor.required_files = vec![JobFilePath::new(
        "bucket",
        "cfg/detector.msa",
        "config/deep/detector.msa",
    )];

    runtime.run_job(&descriptor).await.unwrap();

    let written = std::fs::read_to_string(dir.path().join("config/deep/detector.msa")).unwrap();
    assert_eq!(written, "calibration");
}

// ---------------------------------------------------------------------------
// Test: uploads
// ---------------------------------------------------------------------------

/// A missing output does not stop the other outputs from being uploaded,
/// and the error names only the missing one.
#[tokio::test]
async fn missing_output_is_reported_after_uploading_the_rest() {
    let (store, dir, runtime) = setup();
    std::fs::write(dir.path().join("result.csv"), "pmc,ca\n1,2\n").unwrap();

    let mut descriptor = job("noop");
    descriptor.output_files = vec![
        JobFilePath::new("bucket", "out/missing.csv", "missing.csv"),
        JobFilePath::new("bucket", "out/result.csv", "result.csv"),
    ];

    let err = runtime.run_job(&descriptor).await.unwrap_err();

    assert_matches!(
        err,
        RunnerError::OutputFiles { ref files, .. } if files == &vec!["missing.csv".to_string()]
    );
    assert_eq!(
        err.to_string(),
        "Job Job001 failed to generate/upload output files: missing.csv"
    );
    assert_eq!(
        store.get("bucket", "out/result.csv").as_deref(),
        Some(&b"pmc,ca\n1,2\n"[..])
    );
}

#[tokio::test]
async fn noop_uploads_empty_stdout_log() {
    let (store, _dir, runtime) = setup();
    let mut descriptor = job("noop");
    descriptor.output_files = vec![JobFilePath::new("bucket", "logs/node.log", "stdout")];

    runtime.run_job(&descriptor).await.unwrap();

    assert_eq!(store.get("bucket", "logs/node.log"), Some(Vec::new()));
}

// ---------------------------------------------------------------------------
// Test: command execution
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn command_output_and_files_are_uploaded() {
    let (store, _dir, runtime) = setup();
    store.insert("bucket", "jobs/node00003.pmcs", "101\n102\n");

    let descriptor = NodeJobDescriptor {
        job_id: "grp-2".to_string(),
        command: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            "echo running; wc -l < {shard}.pmcs | tr -d ' ' > {shard}.csv".to_string(),
        ],
        required_files: vec![JobFilePath::new("bucket", "jobs/{shard}.pmcs", "{shard}.pmcs")],
        output_files: vec![
            JobFilePath::new("bucket", "out/{shard}.csv", "{shard}.csv"),
            JobFilePath::new("bucket", "logs/{shard}.log", "stdout"),
        ],
    };
    let json = descriptor.to_json().unwrap();

    runtime
        .run_with_lookup(|key| match key {
            JOB_CONFIG_ENV_VAR => Some(json.clone()),
            NODE_INDEX_ENV_VAR => Some("2".to_string()),
            _ => None,
        })
        .await
        .unwrap();

    assert_eq!(store.get("bucket", "out/node00003.csv").as_deref(), Some(&b"2\n"[..]));
    assert_eq!(store.get("bucket", "logs/node00003.log").as_deref(), Some(&b"running\n"[..]));
}

/// Output beyond the capture limit is discarded without failing the job.
#[cfg(unix)]
#[tokio::test]
async fn very_verbose_command_still_succeeds() {
    let (store, _dir, runtime) = setup();
    let descriptor = NodeJobDescriptor {
        job_id: "grp-1".to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), "head -c 12000000 /dev/zero".to_string()],
        output_files: vec![JobFilePath::new("bucket", "logs/big.log", "stdout")],
        ..Default::default()
    };

    runtime.run_job(&descriptor).await.unwrap();

    let log = store.get("bucket", "logs/big.log").unwrap();
    assert_eq!(log.len() as u64, MAX_OUTPUT_BYTES);
}

/// Stdout and stderr land in the log in the order they were written.
#[cfg(unix)]
#[tokio::test]
async fn stdout_log_keeps_stream_order() {
    let (store, _dir, runtime) = setup();
    let descriptor = NodeJobDescriptor {
        job_id: "grp-1".to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), "echo 1; echo 2 >&2; echo 3".to_string()],
        output_files: vec![JobFilePath::new("bucket", "logs/x.log", "stdout")],
        ..Default::default()
    };

    runtime.run_job(&descriptor).await.unwrap();

    assert_eq!(store.get("bucket", "logs/x.log").as_deref(), Some(&b"1\n2\n3\n"[..]));
}

#[cfg(unix)]
#[tokio::test]
async fn failing_command_skips_uploads() {
    let (store, _dir, runtime) = setup();
    let descriptor = NodeJobDescriptor {
        job_id: "grp-0".to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), "echo boom >&2; exit 4".to_string()],
        output_files: vec![JobFilePath::new("bucket", "logs/x.log", "stdout")],
        ..Default::default()
    };

    let err = runtime.run_job(&descriptor).await.unwrap_err();

    assert_matches!(err, RunnerError::CommandFailed { .. });
    assert_eq!(err.to_string(), "Job grp-0 failed: exit status 4");
    assert!(store.writes().is_empty());
}

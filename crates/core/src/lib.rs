//! Domain core for quantification job orchestration.
//!
//! - [`estimation`]: node count model and input sharding.
//! - [`job`]: [`NodeJobDescriptor`] and [`JobGroup`], plus the worker
//!   environment contract.
//! - [`status`]: aggregate batch job status.
//! - [`storage`]: the [`ObjectStore`] seam and an in-memory store.
//! - [`config`]: [`ClusterConfig`] loaded from the environment.
//! - [`process`]: child process execution with captured output.

pub mod config;
pub mod error;
pub mod estimation;
pub mod job;
pub mod process;
pub mod status;
pub mod storage;

pub use config::ClusterConfig;
pub use error::CoreError;
pub use job::{JobFilePath, JobGroup, NodeJobDescriptor};
pub use status::ClusterJobStatus;
pub use storage::{MemoryObjectStore, ObjectStore, StorageError};

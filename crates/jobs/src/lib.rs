//! Job backends for quantification job groups.
//!
//! [`get_backend`] picks one of [`DockerBackend`], [`KubernetesBackend`]
//! or [`NullBackend`] by name; all of them implement [`JobBackend`].

pub mod backend;
pub mod credentials;
pub mod docker;
pub mod error;
pub mod kubernetes;
pub mod null;
pub mod request;

pub use backend::{get_backend, BackendKind, JobBackend};
pub use credentials::StorageCredentials;
pub use docker::DockerBackend;
pub use error::JobError;
pub use kubernetes::{KubernetesBackend, SupervisionState};
pub use null::NullBackend;
pub use request::{JobRequest, RequestSizing};

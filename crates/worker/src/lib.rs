//! `quant-worker` library crate.
//!
//! The runtime executed inside every job container: download inputs, run
//! the command, upload outputs. The binary entrypoint lives in `main.rs`.

pub mod error;
pub mod runtime;

pub use error::RunnerError;
pub use runtime::WorkerRuntime;

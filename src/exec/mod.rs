// src/exec/mod.rs

//! Execution layer: everything between "this task is ready" and "this task
//! is terminal".
//!
//! - [`backend`] defines the `JobBackend` trait the executor talks to, so
//!   tests can swap in a fake.
//! - [`pool`] is the bounded concurrent executor (one Tokio task per job,
//!   slots guarded by a semaphore).
//! - [`local`] and [`slurm`] are the two production backends.
//! - [`script`] renders shell and `sbatch` scripts for command payloads.
//! - [`logs`] finds and reads job log files.
//! - [`callbacks`] are notification sinks invoked by workers.

pub mod backend;
pub mod callbacks;
pub mod local;
pub mod logs;
pub mod pool;
pub mod script;
pub mod slurm;

pub use backend::{BackendError, BackendFuture, JobBackend, JobHandle, JobOutput};
pub use callbacks::{JobCallback, LoggingCallback};
pub use local::LocalBackend;
pub use pool::{BoundedExecutor, WorkerHandle};
pub use slurm::SlurmBackend;

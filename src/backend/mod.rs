//! Execution backends that realize an admitted job as a cluster workload.
//!
//! The dispatcher treats a backend as a black box: one `submit` call per
//! admitted job, bounded by the dispatcher's own timeout. Every way a backend
//! can fail is reported as a [`BackendError`] whose message is the reason
//! string that ends up in the logs.
//!
//! # Implementations
//!
//! - [`KubectlBackend`]: creates a `batch/v1` Job through `kubectl`
//! - [`SimulatedBackend`]: in-memory stand-in for dry runs and tests

pub mod kubectl;
pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::BackendConfig;
use crate::scheduler::job::JobRecord;

pub use kubectl::KubectlBackend;
pub use simulated::SimulatedBackend;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("job already exists: {0}")]
    AlreadyExists(String),

    #[error("failed to create job: {0}")]
    Rejected(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("job submission timed out after {0:?}")]
    TimedOut(Duration),
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Submit a job to the backend. Returns once the backend has accepted or refused it.
    async fn submit(&self, job: &JobRecord) -> Result<(), BackendError>;
}

/// Build the backend selected by `config`.
pub async fn from_config(config: &BackendConfig) -> Result<Arc<dyn ExecutionBackend>, BackendError> {
    if config.dry_run {
        tracing::info!(
            delay = ?config.simulated_delay,
            "Running in dry run mode, using simulated backend"
        );
        return Ok(Arc::new(SimulatedBackend::new(config.simulated_delay)));
    }

    let backend = KubectlBackend::connect(config).await?;
    tracing::info!(
        kubeconfig = %backend.kubeconfig().display(),
        "Running in production mode, using kubectl backend"
    );
    Ok(Arc::new(backend))
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DispatchError, Result};

/// Tuning for the dispatcher's control loop and execution tasks.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of jobs executing at once. Fixed for the dispatcher's lifetime.
    pub max_concurrency: usize,
    /// Upper bound on how long an idle control loop sleeps before re-checking the queue.
    pub poll_interval: Duration,
    /// Per-job bound on a single backend submission.
    pub execution_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            poll_interval: Duration::from_millis(100),
            execution_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(DispatchError::InvalidConfig(
                "max_concurrency must be a positive integer".to_string(),
            ));
        }
        if self.execution_timeout.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "execution_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Selects and configures the execution backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Use the simulated backend instead of a real cluster.
    pub dry_run: bool,
    /// Path to the kubeconfig handed to kubectl. `~/.kube/config` is expanded.
    pub kubeconfig: Option<PathBuf>,
    /// kubectl binary to invoke
    pub kubectl: PathBuf,
    /// Artificial latency of the simulated backend per submission.
    pub simulated_delay: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            kubeconfig: default_kubeconfig(),
            kubectl: PathBuf::from("kubectl"),
            simulated_delay: Duration::from_secs(10),
        }
    }
}

/// `$HOME/.kube/config`, if a home directory can be located.
pub fn default_kubeconfig() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub dispatcher: DispatcherConfig,
    pub backend: BackendConfig,
    /// Overall deadline for draining HTTP connections and in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            dispatcher: DispatcherConfig::default(),
            backend: BackendConfig::default(),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_dry_run(mut self, simulated_delay: Duration) -> Self {
        self.backend.dry_run = true;
        self.backend.simulated_delay = simulated_delay;
        self
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kubejobs::config::{default_kubeconfig, BackendConfig, DispatcherConfig, ServerConfig};
use kubejobs::server::Server;
use kubejobs::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "kubejobs")]
#[command(version)]
#[command(about = "Priority job queue that dispatches work to a Kubernetes cluster")]
struct Args {
    /// Path to the kubeconfig file (defaults to ~/.kube/config)
    #[arg(long, env = "KUBEJOBS_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Port to run the HTTP server on
    #[arg(long, env = "KUBEJOBS_PORT", default_value = "8080")]
    port: u16,

    /// Maximum number of concurrently dispatched jobs
    #[arg(long, env = "KUBEJOBS_MAX_CONCURRENCY", default_value = "10",
          value_parser = clap::value_parser!(u32).range(1..))]
    max_concurrency: u32,

    /// Use a simulated backend instead of a real cluster
    #[arg(long, env = "KUBEJOBS_DRY_RUN")]
    dry_run: bool,

    /// kubectl binary used to create jobs
    #[arg(long, env = "KUBEJOBS_KUBECTL", default_value = "kubectl")]
    kubectl: PathBuf,

    /// Delay of each simulated job creation, in seconds (dry run only)
    #[arg(long, env = "KUBEJOBS_SIMULATED_DELAY_SECS", default_value = "10")]
    simulated_delay_secs: u64,

    /// Per-job bound on a backend submission, in seconds
    #[arg(long, env = "KUBEJOBS_EXECUTION_TIMEOUT_SECS", default_value = "30")]
    execution_timeout_secs: u64,

    /// Deadline for graceful shutdown, in seconds
    #[arg(long, env = "KUBEJOBS_SHUTDOWN_TIMEOUT_SECS", default_value = "15")]
    shutdown_timeout_secs: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.port)),
            dispatcher: DispatcherConfig {
                max_concurrency: self.max_concurrency as usize,
                execution_timeout: Duration::from_secs(self.execution_timeout_secs),
                ..DispatcherConfig::default()
            },
            backend: BackendConfig {
                dry_run: self.dry_run,
                kubeconfig: self.kubeconfig.or_else(default_kubeconfig),
                kubectl: self.kubectl,
                simulated_delay: Duration::from_secs(self.simulated_delay_secs),
            },
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config();
    tracing::info!(
        port = config.listen_addr.port(),
        kubeconfig = ?config.backend.kubeconfig,
        max_concurrency = config.dispatcher.max_concurrency,
        dry_run = config.backend.dry_run,
        "Starting kubejobs"
    );

    let shutdown = install_shutdown_handler()?;
    let server = Server::new(config, shutdown).await?;
    server.run().await?;

    tracing::info!("Server exited");
    Ok(())
}

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::backend::{BackendError, ExecutionBackend};
use crate::config::BackendConfig;
use crate::scheduler::job::JobRecord;

/// Creates Kubernetes Jobs by piping a manifest to `kubectl create -f -`.
///
/// Each admitted job becomes one `batch/v1` Job with a single container and
/// `restartPolicy: Never`. The child process is killed if the caller drops
/// the submission future, so the dispatcher's timeout really bounds it.
#[derive(Debug, Clone)]
pub struct KubectlBackend {
    kubectl: PathBuf,
    kubeconfig: PathBuf,
}

impl KubectlBackend {
    /// Resolve the kubeconfig and check that the cluster answers.
    pub async fn connect(config: &BackendConfig) -> Result<Self, BackendError> {
        let raw = config
            .kubeconfig
            .as_deref()
            .ok_or_else(|| BackendError::Unavailable("kubeconfig must be provided".to_string()))?;
        let kubeconfig = expand_home(raw)?;

        match tokio::fs::try_exists(&kubeconfig).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(BackendError::Unavailable(format!(
                    "kubeconfig file not found at {}",
                    kubeconfig.display()
                )))
            }
            Err(e) => {
                return Err(BackendError::Unavailable(format!(
                    "cannot read kubeconfig {}: {}",
                    kubeconfig.display(),
                    e
                )))
            }
        }

        let backend = Self {
            kubectl: config.kubectl.clone(),
            kubeconfig,
        };
        backend.check_connection().await?;
        Ok(backend)
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    async fn check_connection(&self) -> Result<(), BackendError> {
        let output = Command::new(&self.kubectl)
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .args(["get", "namespaces", "-o", "name", "--request-timeout=10s"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to run kubectl: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "failed to connect to Kubernetes API: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl ExecutionBackend for KubectlBackend {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    async fn submit(&self, job: &JobRecord) -> Result<(), BackendError> {
        let manifest = serde_json::to_vec(&job_manifest(job))
            .map_err(|e| BackendError::Rejected(format!("cannot encode manifest: {}", e)))?;

        let mut child = Command::new(&self.kubectl)
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .args(["create", "-f", "-", "-o", "name", "--namespace"])
            .arg(job.effective_namespace())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Unavailable(format!("failed to run kubectl: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&manifest)
                .await
                .map_err(|e| BackendError::Unavailable(format!("failed to write manifest: {}", e)))?;
            // Closing stdin tells kubectl the manifest is complete
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BackendError::Unavailable(format!("kubectl did not finish: {}", e)))?;

        Self::process_output(job, output)
    }
}

impl KubectlBackend {
    fn process_output(job: &JobRecord, output: std::process::Output) -> Result<(), BackendError> {
        if output.status.success() {
            tracing::debug!(
                job = %job.name,
                created = %String::from_utf8_lossy(&output.stdout).trim(),
                "kubectl created job"
            );
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = if stderr.is_empty() {
            format!("kubectl exited with {:?}", output.status.code())
        } else {
            stderr
        };

        if reason.contains("AlreadyExists") || reason.contains("already exists") {
            Err(BackendError::AlreadyExists(reason))
        } else {
            Err(BackendError::Rejected(reason))
        }
    }
}

/// The `batch/v1` Job object submitted for `job`.
pub fn job_manifest(job: &JobRecord) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job.name,
            "namespace": job.effective_namespace(),
        },
        "spec": {
            "template": {
                "metadata": { "name": job.name },
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": job.name,
                        "image": job.image,
                        "command": [job.command],
                        "args": job.args,
                    }],
                },
            },
        },
    })
}

fn expand_home(path: &Path) -> Result<PathBuf, BackendError> {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .ok_or_else(|| {
                BackendError::Unavailable(
                    "could not locate home directory for kubeconfig".to_string(),
                )
            }),
        Err(_) => Ok(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_leaves_absolute_paths() {
        let path = Path::new("/etc/kube/config");
        assert_eq!(expand_home(path).unwrap(), PathBuf::from("/etc/kube/config"));
    }

    #[test]
    fn expand_home_replaces_tilde() {
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_home(Path::new("~/.kube/config")).unwrap();
            assert_eq!(expanded, home.join(".kube/config"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn already_exists_is_classified() {
        use std::os::unix::process::ExitStatusExt;

        let job = JobRecord::new("dup", 1, "echo");
        let output = std::process::Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: b"Error from server (AlreadyExists): jobs.batch \"dup\" already exists".to_vec(),
        };
        assert!(matches!(
            KubectlBackend::process_output(&job, output),
            Err(BackendError::AlreadyExists(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn other_failures_are_rejections() {
        use std::os::unix::process::ExitStatusExt;

        let job = JobRecord::new("bad", 1, "echo");
        let output = std::process::Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        match KubectlBackend::process_output(&job, output) {
            Err(BackendError::Rejected(reason)) => assert!(reason.contains("exited")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

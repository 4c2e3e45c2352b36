use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{BackendError, ExecutionBackend};
use crate::scheduler::job::JobRecord;

/// Pretends to be a cluster: waits a fixed delay per submission and remembers
/// which `(namespace, name)` pairs exist, refusing duplicates like a real API
/// server would.
#[derive(Debug)]
pub struct SimulatedBackend {
    delay: Duration,
    created: Mutex<HashSet<(String, String)>>,
}

impl SimulatedBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Names of jobs created so far, sorted.
    pub async fn created_jobs(&self) -> Vec<String> {
        let created = self.created.lock().await;
        let mut names: Vec<String> = created.iter().map(|(_, name)| name.clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn submit(&self, job: &JobRecord) -> Result<(), BackendError> {
        tracing::debug!(job = %job.name, delay = ?self.delay, "Simulating job creation delay");
        tokio::time::sleep(self.delay).await;

        let key = (job.effective_namespace().to_string(), job.name.clone());
        let mut created = self.created.lock().await;
        if !created.insert(key) {
            return Err(BackendError::AlreadyExists(format!(
                "jobs.batch \"{}\" already exists in namespace {}",
                job.name,
                job.effective_namespace()
            )));
        }
        Ok(())
    }
}

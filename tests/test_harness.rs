//! Test harness for dispatcher integration tests.
//!
//! Provides a backend whose submissions block until the test releases them,
//! plus helpers for building dispatchers and waiting on conditions.
#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use kubejobs::backend::{BackendError, ExecutionBackend};
use kubejobs::config::DispatcherConfig;
use kubejobs::scheduler::{Dispatcher, JobRecord, JobRequest};

/// Backend whose submissions park until [`GatedBackend::release`] lets them through.
pub struct GatedBackend {
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: AtomicUsize,
}

impl GatedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    /// Let `n` more submissions finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Submissions for `name` fail with a rejection.
    pub fn fail_job(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    /// Submissions for `name` panic inside the backend.
    pub fn panic_on(&self, name: &str) {
        self.panicking.lock().unwrap().insert(name.to_string());
    }

    /// Names in the order the backend saw them.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn submit(&self, job: &JobRecord) -> Result<(), BackendError> {
        self.started.lock().unwrap().push(job.name.clone());
        if self.panicking.lock().unwrap().contains(&job.name) {
            panic!("backend exploded on {}", job.name);
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let permit = self.gate.acquire().await;
        if let Ok(permit) = permit {
            permit.forget();
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&job.name) {
            return Err(BackendError::Rejected(format!("{} refused", job.name)));
        }
        Ok(())
    }
}

/// Dispatcher config with a short poll interval for fast tests
pub fn test_config(max_concurrency: usize) -> DispatcherConfig {
    DispatcherConfig {
        max_concurrency,
        poll_interval: Duration::from_millis(10),
        execution_timeout: Duration::from_secs(5),
    }
}

pub fn test_dispatcher(
    max_concurrency: usize,
    backend: Arc<dyn ExecutionBackend>,
) -> (Dispatcher, CancellationToken) {
    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(test_config(max_concurrency), backend, cancel.clone())
        .expect("valid test config");
    (dispatcher, cancel)
}

pub fn job(name: &str, priority: i64) -> JobRequest {
    JobRequest {
        command: "echo".to_string(),
        image: "busybox".to_string(),
        ..JobRequest::new(name, priority)
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Synchronous-condition variant of [`wait_until`].
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    wait_until(timeout, || std::future::ready(condition())).await
}

/// Wait until the dispatcher has no running jobs and all slots are free.
pub async fn wait_idle(dispatcher: &Dispatcher) -> bool {
    wait_until(Duration::from_secs(5), || async move {
        let stats = dispatcher.stats().await;
        stats.running == 0 && stats.slots_in_use == 0
    })
    .await
}

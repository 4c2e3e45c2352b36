//! Admission-controlled priority dispatcher.
//!
//! The [`Dispatcher`] owns the job queue, a counting semaphore of admission
//! slots, and the two lifecycle tables (pending and running). A single control
//! loop pulls the highest-priority job whenever a slot is free and hands it to
//! its own execution task, which submits it to the [`ExecutionBackend`].
//!
//! # Job lifecycle
//!
//! 1. [`Dispatcher::submit`] records the job as pending and enqueues it, under
//!    one critical section
//! 2. The control loop acquires a slot, dequeues, and moves the job from
//!    pending to running, again under one critical section
//! 3. The execution task calls the backend with a bounded timeout
//! 4. Whatever the outcome, the job leaves the running table and its slot is
//!    released in the same critical section
//!
//! Failed jobs are logged and dropped. Nothing is retried or re-enqueued.
//!
//! # Stopping
//!
//! External cancellation (the token passed to [`Dispatcher::new`]) and
//! [`Dispatcher::shutdown`] both cancel the same internal stop token, so they
//! have identical effect: the loop stops dequeuing, jobs still queued are
//! abandoned, and jobs already admitted run to completion or timeout. Once
//! every admitted job has finished, the stopped signal fires, exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, RwLock, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::backend::{BackendError, ExecutionBackend};
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result};
use crate::scheduler::job::{JobRecord, JobRequest, JobStatus, JobSummary};
use crate::scheduler::queue::ConcurrentQueue;

/// A running job together with the admission slot it holds.
///
/// Dropping the entry releases the slot, so removing a job from the running
/// table and freeing its capacity cannot come apart.
struct RunningJob {
    record: JobRecord,
    _slot: OwnedSemaphorePermit,
}

enum Admission {
    Admitted(JobRecord),
    Idle,
    Saturated,
    Closed,
}

#[derive(Default)]
struct Lifecycle {
    pending: HashMap<String, JobRecord>,
    running: HashMap<String, RunningJob>,
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: Uuid,
    pub name: String,
    /// Heap slot at insertion time. Advisory only.
    pub queue_position: usize,
}

/// Point-in-time counters, read under the lifecycle lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub queued: usize,
    pub pending: usize,
    pub running: usize,
    pub slots_in_use: usize,
    pub capacity: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Arc<ConcurrentQueue>,
    lifecycle: Arc<RwLock<Lifecycle>>,
    slots: Arc<Semaphore>,
    backend: Arc<dyn ExecutionBackend>,
    stop: CancellationToken,
    wake: Arc<Notify>,
    slot_freed: Arc<Notify>,
    tracker: TaskTracker,
    started: Arc<AtomicBool>,
    stopped: Arc<watch::Sender<bool>>,
}

impl Dispatcher {
    /// Create a dispatcher. Cancelling `cancel` stops it exactly like [`Dispatcher::shutdown`].
    pub fn new(
        config: DispatcherConfig,
        backend: Arc<dyn ExecutionBackend>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let (stopped, _) = watch::channel(false);
        Ok(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            queue: Arc::new(ConcurrentQueue::new()),
            lifecycle: Arc::new(RwLock::new(Lifecycle::default())),
            backend,
            stop: cancel.child_token(),
            wake: Arc::new(Notify::new()),
            slot_freed: Arc::new(Notify::new()),
            tracker: TaskTracker::new(),
            started: Arc::new(AtomicBool::new(false)),
            stopped: Arc::new(stopped),
        })
    }

    /// Accept a job into the queue.
    ///
    /// Rejects an empty name, a name that is already pending or running, and
    /// any submission once a stop has been requested. The stop check happens
    /// under the same lock as the insert, so a job accepted while a stop is
    /// racing in is still counted among the abandoned jobs at drain.
    pub async fn submit(&self, request: JobRequest) -> Result<Submission> {
        if request.name.is_empty() {
            return Err(DispatchError::EmptyName);
        }

        let record = JobRecord::from_request(request);
        let mut lifecycle = self.lifecycle.write().await;

        if self.stop.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        if lifecycle.pending.contains_key(&record.name)
            || lifecycle.running.contains_key(&record.name)
        {
            return Err(DispatchError::DuplicateName(record.name));
        }

        lifecycle.pending.insert(record.name.clone(), record.clone());
        let queue_position = self
            .queue
            .enqueue(record.name.clone(), record.priority, record.clone());
        drop(lifecycle);

        self.wake.notify_one();

        tracing::info!(
            job = %record.name,
            job_id = %record.id,
            priority = record.priority,
            queue_position,
            "Job accepted"
        );

        Ok(Submission {
            job_id: record.id,
            name: record.name,
            queue_position,
        })
    }

    /// Spawn the control loop. May only be called once.
    ///
    /// The returned task finishes after the loop has stopped and every
    /// admitted job has drained.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        if self.stop.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::AlreadyStarted);
        }

        tracing::info!(
            max_concurrency = self.config.max_concurrency,
            backend = self.backend.name(),
            "Starting job dispatcher"
        );

        let control = self.clone();
        Ok(self.supervise(async move { control.control_loop().await }))
    }

    /// Run `control` in its own task, then drain. A panic in `control` stops
    /// the dispatcher instead of leaving it half alive.
    fn supervise<F>(&self, control: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(control).await {
                tracing::error!(error = %e, "Control loop terminated abnormally");
            }
            dispatcher.drain().await;
        })
    }

    /// Stop dequeuing and wait for every admitted job to finish. Idempotent.
    pub async fn shutdown(&self) {
        tracing::info!("Shutdown requested, stopping job processing");
        self.stop.cancel();

        if !self.started.swap(true, Ordering::SeqCst) {
            // Never started, so nothing can be in flight
            self.tracker.close();
            self.mark_stopped();
        }

        self.wait_stopped().await;
    }

    /// Wait until the dispatcher has fully stopped.
    pub async fn wait_stopped(&self) {
        let mut rx = self.stopped.subscribe();
        // The sender lives as long as `self`, so this only returns once stopped
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Receiver for the one-shot stopped signal. The value flips to `true` once.
    pub fn subscribe_stopped(&self) -> watch::Receiver<bool> {
        self.stopped.subscribe()
    }

    pub fn is_accepting(&self) -> bool {
        !self.stop.is_cancelled()
    }

    pub fn capacity(&self) -> usize {
        self.config.max_concurrency
    }

    /// Jobs accepted but not yet dispatched, highest priority first.
    pub async fn pending_jobs(&self) -> Vec<JobSummary> {
        let lifecycle = self.lifecycle.read().await;
        sorted_summaries(lifecycle.pending.values())
    }

    /// Jobs currently executing, highest priority first.
    pub async fn running_jobs(&self) -> Vec<JobSummary> {
        let lifecycle = self.lifecycle.read().await;
        sorted_summaries(lifecycle.running.values().map(|job| &job.record))
    }

    pub async fn status_of(&self, name: &str) -> Option<JobStatus> {
        let lifecycle = self.lifecycle.read().await;
        if lifecycle.running.contains_key(name) {
            Some(JobStatus::Running)
        } else if lifecycle.pending.contains_key(name) {
            Some(JobStatus::Pending)
        } else {
            None
        }
    }

    pub async fn stats(&self) -> DispatcherStats {
        let lifecycle = self.lifecycle.read().await;
        DispatcherStats {
            queued: self.queue.size(),
            pending: lifecycle.pending.len(),
            running: lifecycle.running.len(),
            slots_in_use: self.config.max_concurrency - self.slots.available_permits(),
            capacity: self.config.max_concurrency,
        }
    }

    /// The single long-lived consumer of the queue and of admission slots.
    ///
    /// An idle loop waits for either an enqueue notification or the poll
    /// interval, whichever comes first, so a lost wakeup costs at most one
    /// interval of latency. A saturated loop waits for a finished job to hand
    /// back its slot.
    async fn control_loop(&self) {
        loop {
            if self.stop.is_cancelled() {
                tracing::info!("Stop requested, stopping job processing");
                break;
            }

            match self.try_admit().await {
                Admission::Admitted(record) => self.dispatch(record),
                Admission::Idle => {
                    tokio::select! {
                        _ = self.stop.cancelled() => {}
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Admission::Saturated => {
                    tokio::select! {
                        biased;
                        _ = self.stop.cancelled() => {
                            tracing::info!("Stop requested while waiting for an admission slot");
                        }
                        _ = self.slot_freed.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Admission::Closed => {
                    tracing::error!("Admission semaphore closed, stopping job processing");
                    break;
                }
            }
        }
    }

    /// Take a slot, dequeue the next job and move it from pending to running.
    ///
    /// All three happen under the lifecycle write lock, so readers never see a
    /// slot without its running entry or a dequeued job still listed as pending.
    async fn try_admit(&self) -> Admission {
        let mut lifecycle = self.lifecycle.write().await;
        if self.queue.is_empty() {
            return Admission::Idle;
        }

        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => return Admission::Saturated,
            Err(TryAcquireError::Closed) => return Admission::Closed,
        };

        let Some(entry) = self.queue.dequeue() else {
            tracing::warn!("Queue yielded no job, releasing admission slot");
            return Admission::Idle;
        };

        lifecycle.pending.remove(&entry.name);
        lifecycle.running.insert(
            entry.name.clone(),
            RunningJob {
                record: entry.record.clone(),
                _slot: slot,
            },
        );
        Admission::Admitted(entry.record)
    }

    fn dispatch(&self, record: JobRecord) {
        tracing::info!(
            job = %record.name,
            job_id = %record.id,
            priority = record.priority,
            "Dispatching job"
        );

        let dispatcher = self.clone();
        self.tracker.spawn(async move {
            dispatcher.execute(record).await;
        });
    }

    /// Body of one execution task.
    ///
    /// The backend call runs in a nested task so a panic inside it surfaces
    /// as a `JoinError` here instead of unwinding past the cleanup.
    async fn execute(&self, record: JobRecord) {
        let backend = self.backend.clone();
        let timeout = self.config.execution_timeout;
        let job = record.clone();

        let outcome = tokio::spawn(async move {
            match tokio::time::timeout(timeout, backend.submit(&job)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::TimedOut(timeout)),
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(job = %record.name, job_id = %record.id, "Successfully submitted job");
            }
            Ok(Err(e)) => {
                tracing::error!(
                    job = %record.name,
                    job_id = %record.id,
                    error = %e,
                    "Failed to submit job"
                );
            }
            Err(e) => {
                tracing::error!(
                    job = %record.name,
                    job_id = %record.id,
                    error = %e,
                    "Job execution task failed"
                );
            }
        }

        self.finish(&record.name).await;
    }

    /// Remove a finished job from the running table, releasing its slot.
    async fn finish(&self, name: &str) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.running.remove(name).is_none() {
            tracing::warn!(job = %name, "Finished job was not in the running table");
        }
        drop(lifecycle);
        self.slot_freed.notify_one();
    }

    async fn drain(&self) {
        self.stop.cancel();

        // Submissions check the stop under the write lock, so once this count
        // is taken no further job can be accepted
        let abandoned = {
            let _lifecycle = self.lifecycle.write().await;
            self.queue.size()
        };
        if abandoned > 0 {
            tracing::warn!(abandoned, "Abandoning queued jobs that were never dispatched");
        }

        self.tracker.close();
        tracing::info!(in_flight = self.tracker.len(), "Waiting for in-flight jobs to finish");
        self.tracker.wait().await;

        self.mark_stopped();
    }

    fn mark_stopped(&self) {
        let fired = self.stopped.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        });
        if fired {
            tracing::info!("Job processing stopped");
        }
    }
}

fn sorted_summaries<'a>(records: impl Iterator<Item = &'a JobRecord>) -> Vec<JobSummary> {
    let mut summaries: Vec<JobSummary> = records.map(JobRecord::summary).collect();
    summaries.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    summaries
}

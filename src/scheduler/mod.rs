pub mod dispatcher;
pub mod heap;
pub mod job;
pub mod queue;

pub use dispatcher::{Dispatcher, DispatcherStats, Submission};
pub use job::{JobRecord, JobRequest, JobStatus, JobSummary};
pub use queue::ConcurrentQueue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace used when a submission leaves it empty.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Lifecycle stage of a job while the dispatcher tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
        }
    }
}

/// A submission as received from a caller, before the dispatcher accepts it.
///
/// Only `name` is validated; every other field is taken as-is and missing
/// fields take their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub image: String,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, priority: i64) -> Self {
        Self {
            name: name.into(),
            priority,
            ..Default::default()
        }
    }
}

/// Caller-submitted description of work. Immutable once the dispatcher accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub name: String,
    pub priority: i64,
    pub command: String,
    pub args: Vec<String>,
    pub namespace: String,
    pub image: String,
    pub submitted_at: DateTime<Utc>,
}

impl JobRecord {
    /// Build a record with a freshly assigned identifier.
    pub fn new(name: impl Into<String>, priority: i64, command: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            priority,
            command: command.into(),
            args: Vec::new(),
            namespace: String::new(),
            image: String::new(),
            submitted_at: Utc::now(),
        }
    }

    /// Accept a request, assigning it a new identifier.
    pub fn from_request(request: JobRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: request.name,
            priority: request.priority,
            command: request.command,
            args: request.args,
            namespace: request.namespace,
            image: request.image,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// The namespace the job is created in, falling back to [`DEFAULT_NAMESPACE`].
    pub fn effective_namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            name: self.name.clone(),
            job_id: self.id.to_string(),
            priority: self.priority,
        }
    }
}

/// Read-only view of a tracked job, as listed by the pending and running endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    pub job_id: String,
    pub priority: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_fields_default_when_missing() {
        let request: JobRequest = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
        assert_eq!(request, JobRequest::new("bare", 0));
    }

    #[test]
    fn request_rejects_wrong_types() {
        assert!(serde_json::from_str::<JobRequest>(r#"{"name": "x", "args": "a b"}"#).is_err());
    }

    #[test]
    fn from_request_assigns_fresh_ids() {
        let request = JobRequest {
            command: "echo".to_string(),
            args: vec!["hi".to_string()],
            image: "busybox".to_string(),
            ..JobRequest::new("x", 1)
        };
        let a = JobRecord::from_request(request.clone());
        let b = JobRecord::from_request(request);

        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "x");
        assert_eq!(a.args, vec!["hi".to_string()]);
        assert_eq!(a.image, "busybox");
    }

    #[test]
    fn empty_namespace_falls_back_to_default() {
        let job = JobRecord::new("x", 1, "echo");
        assert_eq!(job.effective_namespace(), DEFAULT_NAMESPACE);
        assert_eq!(job.with_namespace("batch").effective_namespace(), "batch");
    }

    #[test]
    fn summary_carries_identity() {
        let job = JobRecord::new("x", 7, "echo");
        let summary = job.summary();
        assert_eq!(summary.name, "x");
        assert_eq!(summary.priority, 7);
        assert_eq!(summary.job_id, job.id.to_string());
    }

    #[test]
    fn status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Running.to_string(), "running");
    }
}

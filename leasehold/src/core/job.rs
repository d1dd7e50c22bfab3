use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::core::codec::CodecError;
use crate::core::error::StoreError;
use crate::core::options::{duration_to_ms, StoreOptions, MAX_DURATION_MS};
use crate::core::DateTime;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker.
    Ready,
    /// Reserved by a worker.
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Ready,
        JobStatus::Processing,
        JobStatus::Done,
        JobStatus::Failed,
    ];

    /// The value stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(JobStatus::Ready),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A persisted job, as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    /// Worker currently holding the job. Only set while `processing`.
    pub worker_id: Option<String>,
    pub name: Option<String>,
    pub created: DateTime,
    /// Lease deadline.
    pub expires: Option<DateTime>,
    /// Lease duration in milliseconds.
    pub expire_ms: Option<i64>,
    /// Hard stall deadline.
    pub stalls: Option<DateTime>,
    /// Stall duration in milliseconds.
    pub stall_ms: Option<i64>,
    pub status: JobStatus,
    /// How many times recovery returned this job to `ready`.
    pub attempts: u32,
    /// Decoded payload.
    pub data: serde_json::Value,
}

impl JobRecord {
    /// Decode the payload into a concrete type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            let raw = self.data.to_string();
            StoreError::deserialize_error(self.id.as_str(), raw.as_bytes(), CodecError::Json(e))
        })
    }
}

/// A job about to be inserted with [`JobStore::add`](crate::core::store::JobStore::add).
///
/// # Examples
///
/// ```rust
/// use leasehold::core::job::NewJob;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let job = NewJob::new(json!({"to": "someone@example.com"}))
///     .with_id("email-42")
///     .with_name("send-email")
///     .with_lease(Duration::from_secs(30));
/// assert_eq!(job.id(), "email-42");
/// ```
#[derive(Debug, Clone)]
pub struct NewJob {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) data: serde_json::Value,
    pub(crate) expire_ms: Option<i64>,
    pub(crate) stall_ms: Option<i64>,
    pub(crate) created: Option<DateTime>,
}

impl NewJob {
    /// A job with a fresh UUIDv7 id and the given payload.
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: None,
            data,
            expire_ms: None,
            stall_ms: None,
            created: None,
        }
    }

    /// A job whose payload is `payload` serialized to JSON.
    pub fn from_payload<T: Serialize>(payload: &T) -> Result<Self, StoreError> {
        let mut job = Self::new(serde_json::Value::Null);
        job.data = serde_json::to_value(payload)
            .map_err(|e| StoreError::serialize_error(job.id.as_str(), CodecError::Json(e)))?;
        Ok(job)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Lease length, clamped to [`MAX_DURATION_MS`]. A reserved job whose lease runs out is
    /// requeued by the lease scan.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.expire_ms = Some(duration_to_ms(lease));
        self
    }

    /// Hard timeout. A reserved job still processing after this long is requeued by the stall
    /// scan, even if its lease keeps being renewed. Clamped like [`with_lease`](Self::with_lease).
    pub fn with_stall_timeout(mut self, stall: Duration) -> Self {
        self.stall_ms = Some(duration_to_ms(stall));
        self
    }

    /// Override the creation timestamp. Defaults to the time of insertion.
    pub fn created_at(mut self, created: DateTime) -> Self {
        self.created = Some(created);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn expire_ms(&self) -> Option<i64> {
        self.expire_ms
    }

    pub fn stall_ms(&self) -> Option<i64> {
        self.stall_ms
    }

    pub fn created(&self) -> Option<DateTime> {
        self.created
    }

    /// Fill in lease and stall durations the job left unset from store-wide defaults.
    pub fn apply_defaults(mut self, options: &StoreOptions) -> Self {
        self.expire_ms = self.expire_ms.or(options.default_lease_ms());
        self.stall_ms = self.stall_ms.or(options.default_stall_ms());
        self
    }
}

/// A value bound to one column of a filter or patch.
///
/// Backends map each variant to their own column encoding. The column names come from a fixed
/// list, never from caller input.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue<'a> {
    Text(Option<&'a str>),
    Timestamp(Option<DateTime>),
    Integer(Option<i64>),
    Status(JobStatus),
    /// Payload, to be packed by the store's codec.
    Data(&'a serde_json::Value),
}

/// Conjunctive equality filter over a closed set of columns.
///
/// An empty filter matches every job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub id: Option<String>,
    pub worker_id: Option<String>,
    pub name: Option<String>,
    pub status: Option<JobStatus>,
    pub attempts: Option<u32>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates().is_empty()
    }

    /// `(column, value)` pairs that must all be equal for a row to match.
    pub fn predicates(&self) -> Vec<(&'static str, ColumnValue<'_>)> {
        let mut out = Vec::new();
        if let Some(id) = &self.id {
            out.push(("id", ColumnValue::Text(Some(id))));
        }
        if let Some(worker_id) = &self.worker_id {
            out.push(("worker_id", ColumnValue::Text(Some(worker_id))));
        }
        if let Some(name) = &self.name {
            out.push(("name", ColumnValue::Text(Some(name))));
        }
        if let Some(status) = self.status {
            out.push(("status", ColumnValue::Status(status)));
        }
        if let Some(attempts) = self.attempts {
            out.push(("attempts", ColumnValue::Integer(Some(i64::from(attempts)))));
        }
        out
    }
}

/// Partial update for [`JobStore::update_by_id`](crate::core::store::JobStore::update_by_id).
///
/// Only the fields listed here can be changed. `id` and `created` are immutable, and `attempts`
/// is only ever bumped by recovery.
///
/// `worker_id` can only change together with `status`: a `processing` job must name its worker
/// and a `ready` job never has one. See [`validate`](JobPatch::validate).
///
/// ```rust
/// use leasehold::core::job::{ColumnValue, JobPatch, JobStatus};
///
/// let patch = JobPatch::new().status(JobStatus::Ready);
/// // Moving back to ready always releases the worker.
/// assert!(patch.assignments().contains(&("worker_id", ColumnValue::Text(None))));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub worker_id: Option<Option<String>>,
    pub name: Option<Option<String>>,
    pub expires: Option<Option<DateTime>>,
    pub expire_ms: Option<Option<i64>>,
    pub stalls: Option<Option<DateTime>>,
    pub stall_ms: Option<Option<i64>>,
    pub status: Option<JobStatus>,
    pub data: Option<serde_json::Value>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_id(mut self, worker_id: Option<String>) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn name(mut self, name: Option<String>) -> Self {
        self.name = Some(name);
        self
    }

    pub fn expires(mut self, expires: Option<DateTime>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn expire_ms(mut self, expire_ms: Option<i64>) -> Self {
        self.expire_ms = Some(expire_ms);
        self
    }

    pub fn stalls(mut self, stalls: Option<DateTime>) -> Self {
        self.stalls = Some(stalls);
        self
    }

    pub fn stall_ms(mut self, stall_ms: Option<i64>) -> Self {
        self.stall_ms = Some(stall_ms);
        self
    }

    /// Set the status. `Ready` also clears `worker_id`.
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments().is_empty()
    }

    /// Check that applying the patch keeps the job consistent.
    ///
    /// Fails with [`StoreError::InvalidUpdate`] when the worker changes without a status, when
    /// a `processing` status names no worker, when a `ready` status names one, or when a
    /// duration is negative or above [`MAX_DURATION_MS`].
    pub fn validate(&self) -> Result<(), StoreError> {
        let invalid = |reason: &str| {
            Err(StoreError::InvalidUpdate {
                reason: reason.to_string(),
            })
        };
        match (self.status, &self.worker_id) {
            (None, Some(_)) => return invalid("worker_id can only change together with status"),
            (Some(JobStatus::Processing), None | Some(None)) => {
                return invalid("a processing job needs a worker_id")
            }
            (Some(JobStatus::Ready), Some(Some(_))) => {
                return invalid("a ready job cannot keep a worker_id")
            }
            _ => {}
        }
        for (column, duration) in [("expire_ms", self.expire_ms), ("stall_ms", self.stall_ms)] {
            if let Some(Some(ms)) = duration {
                if !(0..=MAX_DURATION_MS).contains(&ms) {
                    return Err(StoreError::InvalidUpdate {
                        reason: format!("{column} must be between 0 and {MAX_DURATION_MS}, got {ms}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// `(column, value)` pairs for the SET clause, in a stable order.
    pub fn assignments(&self) -> Vec<(&'static str, ColumnValue<'_>)> {
        let mut out = Vec::new();
        match (&self.worker_id, self.status) {
            (Some(worker_id), _) => out.push(("worker_id", ColumnValue::Text(worker_id.as_deref()))),
            (None, Some(JobStatus::Ready)) => out.push(("worker_id", ColumnValue::Text(None))),
            (None, _) => {}
        }
        if let Some(name) = &self.name {
            out.push(("name", ColumnValue::Text(name.as_deref())));
        }
        if let Some(expires) = self.expires {
            out.push(("expires", ColumnValue::Timestamp(expires)));
        }
        if let Some(expire_ms) = self.expire_ms {
            out.push(("expire_ms", ColumnValue::Integer(expire_ms)));
        }
        if let Some(stalls) = self.stalls {
            out.push(("stalls", ColumnValue::Timestamp(stalls)));
        }
        if let Some(stall_ms) = self.stall_ms {
            out.push(("stall_ms", ColumnValue::Integer(stall_ms)));
        }
        if let Some(status) = self.status {
            out.push(("status", ColumnValue::Status(status)));
        }
        if let Some(data) = &self.data {
            out.push(("data", ColumnValue::Data(data)));
        }
        out
    }
}

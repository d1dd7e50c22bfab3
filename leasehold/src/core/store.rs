use async_trait::async_trait;
use chrono::Utc;

use crate::core::error::StoreError;
use crate::core::job::{JobFilter, JobPatch, JobRecord, JobStatus, NewJob};
use crate::core::recovery::RecoveryKind;
use crate::core::{DateTime, Duration};

/// A durable job table shared by any number of workers.
///
/// Every guarantee comes from the database. Implementations hold no client-side locks, and
/// every method is a single statement round trip.
///
/// ### Reservation
///
/// [`reserve`](JobStore::reserve) moves exactly one `ready` job to `processing` in one atomic
/// step. The database evaluates both the choice of row and the update, so two workers (even in
/// different processes) never get the same job. Jobs are handed out in insertion order.
///
/// ### Recovery
///
/// A reserved job carries two independent deadlines: the lease (`expires`, pushed forward by
/// [`renew_lease`](JobStore::renew_lease)) and the stall deadline (`stalls`, never renewed).
/// [`recover`](JobStore::recover) returns every `processing` job whose chosen deadline has
/// passed to `ready` and bumps its `attempts`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create the job table, its indexes and any server-side routines if they are missing.
    ///
    /// Safe to call any number of times, from any number of processes.
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Close the underlying pool. Subsequent calls fail with [`StoreError::NotOpen`].
    async fn close(&self);

    /// Insert a new `ready` job and return the stored record.
    ///
    /// Fails with [`StoreError::DuplicateId`] if the id is taken.
    async fn add(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// All jobs matching `filter`, oldest first.
    async fn get(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError>;

    async fn count(&self, filter: &JobFilter) -> Result<u64, StoreError>;

    /// Apply `patch` to job `id` and return the updated record.
    ///
    /// Fails with [`StoreError::InvalidUpdate`] if [`JobPatch::validate`] rejects the patch, and
    /// with [`StoreError::RowCount`] unless exactly one row changed.
    async fn update_by_id(&self, id: &str, patch: &JobPatch) -> Result<JobRecord, StoreError>;

    /// Delete job `id`. Fails with [`StoreError::RowCount`] unless exactly one row was removed.
    async fn remove_by_id(&self, id: &str) -> Result<bool, StoreError>;

    /// Delete every job matching `filter`. Returns the number removed, which may be zero.
    async fn remove(&self, filter: &JobFilter) -> Result<u64, StoreError>;

    /// Delete every job in `status`. Returns the number removed, which may be zero.
    async fn remove_by_status(&self, status: JobStatus) -> Result<u64, StoreError> {
        self.remove(&JobFilter::new().status(status)).await
    }

    /// Delete every job.
    async fn clear(&self) -> Result<u64, StoreError>;

    /// Atomically claim the oldest `ready` job for `worker_id`.
    ///
    /// The returned record is already `processing`, owned by `worker_id`, with `expires` and
    /// `stalls` computed from `now`. Returns `None` if nothing is ready.
    async fn reserve(&self, worker_id: &str, now: DateTime)
        -> Result<Option<JobRecord>, StoreError>;

    /// Wait for the next job, polling [`reserve`](JobStore::reserve) at `poll_interval`.
    async fn reserve_next(
        &self,
        worker_id: &str,
        poll_interval: Duration,
    ) -> Result<JobRecord, StoreError> {
        let duration = poll_interval
            .to_std()
            .map_err(|_| StoreError::DatabaseError(anyhow::anyhow!("Invalid poll interval")))?;
        let mut interval = tokio::time::interval(duration);
        loop {
            interval.tick().await;
            if let Some(job) = self.reserve(worker_id, Utc::now()).await? {
                break Ok(job);
            }
        }
    }

    /// Push the lease of a job held by `worker_id` to `now + expire_ms`.
    ///
    /// The stall deadline is left untouched. Fails with [`StoreError::RowCount`] if the job is
    /// not `processing` under that worker.
    async fn renew_lease(
        &self,
        id: &str,
        worker_id: &str,
        now: DateTime,
    ) -> Result<JobRecord, StoreError>;

    /// Requeue every `processing` job whose `kind` deadline is at or before `now`.
    ///
    /// Requeued jobs become `ready`, lose their worker, gain one attempt and get a fresh
    /// deadline of `now` plus their configured duration. Returns the number of jobs requeued.
    async fn recover(&self, kind: RecoveryKind, now: DateTime) -> Result<u64, StoreError>;

    /// Lease-expiry scan.
    async fn requeue_expired(&self, now: DateTime) -> Result<u64, StoreError> {
        self.recover(RecoveryKind::Lease, now).await
    }

    /// Stall scan.
    async fn requeue_stalled(&self, now: DateTime) -> Result<u64, StoreError> {
        self.recover(RecoveryKind::Stall, now).await
    }

    /// Mark job `id` as `done`.
    async fn complete(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.update_by_id(id, &JobPatch::new().status(JobStatus::Done))
            .await
    }

    /// Mark job `id` as `failed`. It will not be handed out again.
    async fn fail(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.update_by_id(id, &JobPatch::new().status(JobStatus::Failed))
            .await
    }
}

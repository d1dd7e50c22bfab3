//! Shared test specifications for `JobStore` implementations.
//!
//! These test functions can be called by any backend (PostgreSQL, SQLite, etc.)
//! to ensure consistent behavior across all implementations.

/// Generate all store spec test wrappers for a backend.
///
/// # Usage
///
/// ```ignore
/// // PostgreSQL example with sqlx::test
/// leasehold::generate_store_spec_tests! {
///     backend = "pg",
///     test_attrs = [#[sqlx::test(migrations = false)]],
///     args = (pool: PgPool),
///     setup = PostgresJobStore::with_pool(pool)
/// }
///
/// // SQLite example with tokio::test
/// leasehold::generate_store_spec_tests! {
///     backend = "sqlite",
///     test_attrs = [#[tokio::test]],
///     args = (),
///     setup = memory_store().await
/// }
/// ```
#[macro_export]
macro_rules! generate_store_spec_tests {
    (
        backend = $backend:literal,
        test_attrs = [$(#[$test_attr:meta])+],
        args = ($($arg:ident: $arg_ty:ty),* $(,)?),
        setup = $setup_expr:expr
    ) => {
        $crate::paste::paste! {
            // Reservation
            $(#[$test_attr])+
            async fn [<reserve_empty_returns_none_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_reserve_empty_returns_none(store).await;
            }

            $(#[$test_attr])+
            async fn [<reserve_example_scenario_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_reserve_example_scenario(store).await;
            }

            $(#[$test_attr])+
            async fn [<reserve_single_winner_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_reserve_single_winner(store).await;
            }

            $(#[$test_attr])+
            async fn [<reserve_distinct_jobs_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_reserve_distinct_jobs(store).await;
            }

            $(#[$test_attr])+
            async fn [<reserve_insertion_order_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_reserve_insertion_order(store).await;
            }

            $(#[$test_attr])+
            async fn [<finished_jobs_not_reserved_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_finished_jobs_not_reserved(store).await;
            }

            // Recovery
            $(#[$test_attr])+
            async fn [<lease_recovery_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_lease_recovery(store).await;
            }

            $(#[$test_attr])+
            async fn [<stall_recovery_independent_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_stall_recovery_independent(store).await;
            }

            $(#[$test_attr])+
            async fn [<renewed_lease_still_stalls_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_renewed_lease_still_stalls(store).await;
            }

            $(#[$test_attr])+
            async fn [<renew_lease_requires_owner_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_renew_lease_requires_owner(store).await;
            }

            $(#[$test_attr])+
            async fn [<reclaimed_job_not_clobbered_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_reclaimed_job_not_clobbered(store).await;
            }

            $(#[$test_attr])+
            async fn [<recovery_skips_other_states_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_recovery_skips_other_states(store).await;
            }

            $(#[$test_attr])+
            async fn [<jobs_without_deadlines_stay_reserved_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_jobs_without_deadlines_stay_reserved(store).await;
            }

            $(#[$test_attr])+
            async fn [<longest_durations_stay_usable_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_longest_durations_stay_usable(store).await;
            }

            // Schema bootstrap
            $(#[$test_attr])+
            async fn [<bootstrap_idempotent_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_bootstrap_idempotent(store).await;
            }

            // Lifecycle API
            $(#[$test_attr])+
            async fn [<add_get_roundtrip_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_add_get_roundtrip(store).await;
            }

            $(#[$test_attr])+
            async fn [<duplicate_id_rejected_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_duplicate_id_rejected(store).await;
            }

            $(#[$test_attr])+
            async fn [<update_by_id_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_update_by_id(store).await;
            }

            $(#[$test_attr])+
            async fn [<update_by_id_precision_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_update_by_id_precision(store).await;
            }

            $(#[$test_attr])+
            async fn [<update_rejects_inconsistent_patch_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_update_rejects_inconsistent_patch(store).await;
            }

            $(#[$test_attr])+
            async fn [<remove_operations_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_remove_operations(store).await;
            }

            $(#[$test_attr])+
            async fn [<filters_and_count_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_filters_and_count(store).await;
            }

            $(#[$test_attr])+
            async fn [<closed_store_rejects_calls_ $backend>]($($arg: $arg_ty),*) {
                let store = $setup_expr;
                $crate::store_spec::test_closed_store_rejects_calls(store).await;
            }
        }
    };
}

use crate::core::{
    error::StoreError,
    job::{JobFilter, JobPatch, JobStatus, NewJob},
    options::MAX_DURATION_MS,
    store::JobStore,
    DateTime, Duration, Utc,
};
use chrono::TimeZone;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestPayload {
    pub arg1: i32,
    pub arg2: String,
    pub tags: Vec<String>,
}

impl Default for TestPayload {
    fn default() -> Self {
        Self {
            arg1: 1774,
            arg2: String::from("this is a test"),
            tags: vec!["a".to_string(), "ü".to_string()],
        }
    }
}

/// Fixed clock origin so deadlines can be compared exactly.
pub fn t(secs: i64) -> DateTime {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
}

fn job(id: &str) -> NewJob {
    NewJob::new(json!({ "id": id })).with_id(id)
}

fn secs(n: u64) -> std::time::Duration {
    std::time::Duration::from_secs(n)
}

/// With nothing queued, reserve is an empty result rather than an error.
pub async fn test_reserve_empty_returns_none<S>(store: S)
where
    S: JobStore,
{
    let job = store.reserve("worker-a", Utc::now()).await.unwrap();
    assert!(job.is_none());
}

/// One ready job, two workers: the first gets it, the second gets nothing.
pub async fn test_reserve_example_scenario<S>(store: S)
where
    S: JobStore,
{
    let added = store
        .add(
            job("j1")
                .with_lease(secs(5))
                .with_stall_timeout(secs(60))
                .created_at(t(0)),
        )
        .await
        .unwrap();
    assert_eq!(added.status, JobStatus::Ready);
    assert_eq!(added.attempts, 0);
    assert_eq!(added.worker_id, None);
    assert_eq!(added.expire_ms, Some(5_000));
    assert_eq!(added.stall_ms, Some(60_000));

    let reserved = store.reserve("workerA", t(1)).await.unwrap().unwrap();
    assert_eq!(reserved.id, "j1");
    assert_eq!(reserved.status, JobStatus::Processing);
    assert_eq!(reserved.worker_id.as_deref(), Some("workerA"));
    assert_eq!(reserved.expires, Some(t(6)));
    assert_eq!(reserved.stalls, Some(t(61)));
    assert_eq!(reserved.attempts, 0);
    assert_eq!(reserved.data, json!({ "id": "j1" }));

    assert!(store.reserve("workerB", t(1)).await.unwrap().is_none());

    let stored = store.get_by_id("j1").await.unwrap().unwrap();
    assert_eq!(stored, reserved);
}

/// Many concurrent reservations against one ready job produce exactly one winner.
pub async fn test_reserve_single_winner<S>(store: S)
where
    S: JobStore + 'static,
{
    let store = Arc::new(store);
    store.add(job("only-job")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .reserve(&format!("worker-{i}"), Utc::now())
                .await
                .unwrap()
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            winners.push(job);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, "only-job");
    let stored = store.get_by_id("only-job").await.unwrap().unwrap();
    assert_eq!(stored.worker_id, winners[0].worker_id);
}

/// More workers than jobs: every job is handed out exactly once.
pub async fn test_reserve_distinct_jobs<S>(store: S)
where
    S: JobStore + 'static,
{
    let store = Arc::new(store);
    for i in 0..5 {
        store.add(job(&format!("job-{i}"))).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .reserve(&format!("worker-{i}"), Utc::now())
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            ids.push(job.id);
        }
    }

    let unique: HashSet<_> = ids.iter().cloned().collect();
    assert_eq!(ids.len(), 5, "every job handed out once: {ids:?}");
    assert_eq!(unique.len(), 5);
    assert_eq!(
        store
            .count(&JobFilter::new().status(JobStatus::Ready))
            .await
            .unwrap(),
        0
    );
}

/// Ready jobs are handed out oldest first.
pub async fn test_reserve_insertion_order<S>(store: S)
where
    S: JobStore,
{
    store.add(job("c").created_at(t(2))).await.unwrap();
    store.add(job("a").created_at(t(0))).await.unwrap();
    store.add(job("b").created_at(t(1))).await.unwrap();

    let mut order = Vec::new();
    while let Some(job) = store.reserve("w", t(10)).await.unwrap() {
        order.push(job.id);
    }
    assert_eq!(order, vec!["a", "b", "c"]);
}

/// Done and failed jobs are never handed out again.
pub async fn test_finished_jobs_not_reserved<S>(store: S)
where
    S: JobStore,
{
    store.add(job("ok")).await.unwrap();
    store.add(job("bad")).await.unwrap();

    let first = store.reserve("w", t(0)).await.unwrap().unwrap();
    let second = store.reserve("w", t(0)).await.unwrap().unwrap();

    let done = store.complete(&first.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    let failed = store.fail(&second.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    assert!(store.reserve("w", t(1)).await.unwrap().is_none());
}

/// An expired lease returns the job to ready with one more attempt.
pub async fn test_lease_recovery<S>(store: S)
where
    S: JobStore,
{
    store.add(job("j1").with_lease(secs(5))).await.unwrap();
    let reserved = store.reserve("w1", t(0)).await.unwrap().unwrap();
    assert_eq!(reserved.expires, Some(t(5)));

    assert_eq!(store.requeue_expired(t(4)).await.unwrap(), 0);
    assert_eq!(store.requeue_expired(t(5)).await.unwrap(), 1);

    let job = store.get_by_id("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.worker_id, None);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.expires, Some(t(10)));

    // Running again right away has nothing left to do.
    assert_eq!(store.requeue_expired(t(5)).await.unwrap(), 0);

    let again = store.reserve("w2", t(6)).await.unwrap().unwrap();
    assert_eq!(again.id, "j1");
    assert_eq!(again.attempts, 1);
    assert_eq!(again.expires, Some(t(11)));
}

/// The stall scan requeues a job whose lease is still in the future.
pub async fn test_stall_recovery_independent<S>(store: S)
where
    S: JobStore,
{
    store
        .add(job("j1").with_lease(secs(60)).with_stall_timeout(secs(10)))
        .await
        .unwrap();
    store.reserve("w1", t(0)).await.unwrap().unwrap();

    assert_eq!(store.requeue_expired(t(11)).await.unwrap(), 0);
    assert_eq!(store.requeue_stalled(t(11)).await.unwrap(), 1);

    let job = store.get_by_id("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.worker_id, None);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.stalls, Some(t(21)));
    assert_eq!(job.expires, Some(t(60)));

    assert_eq!(store.requeue_stalled(t(11)).await.unwrap(), 0);
}

/// Renewing the lease keeps the lease scan away but not the stall scan.
pub async fn test_renewed_lease_still_stalls<S>(store: S)
where
    S: JobStore,
{
    store
        .add(job("j1").with_lease(secs(5)).with_stall_timeout(secs(12)))
        .await
        .unwrap();
    store.reserve("w1", t(0)).await.unwrap().unwrap();

    let renewed = store.renew_lease("j1", "w1", t(4)).await.unwrap();
    assert_eq!(renewed.expires, Some(t(9)));
    assert_eq!(renewed.stalls, Some(t(12)));
    assert_eq!(store.requeue_expired(t(6)).await.unwrap(), 0);

    store.renew_lease("j1", "w1", t(8)).await.unwrap();
    assert_eq!(store.requeue_expired(t(12)).await.unwrap(), 0);
    assert_eq!(store.requeue_stalled(t(12)).await.unwrap(), 1);

    let job = store.get_by_id("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.attempts, 1);
}

/// Only the worker holding a processing job can renew it.
pub async fn test_renew_lease_requires_owner<S>(store: S)
where
    S: JobStore,
{
    store.add(job("j1").with_lease(secs(5))).await.unwrap();

    let err = store.renew_lease("j1", "w1", t(0)).await.unwrap_err();
    assert!(matches!(err, StoreError::RowCount { affected: 0, .. }));

    store.reserve("w1", t(0)).await.unwrap().unwrap();
    let err = store.renew_lease("j1", "w2", t(1)).await.unwrap_err();
    assert!(matches!(err, StoreError::RowCount { affected: 0, .. }));

    let err = store.renew_lease("missing", "w1", t(1)).await.unwrap_err();
    assert!(matches!(err, StoreError::RowCount { .. }));
}

/// A scan running after a job was requeued and claimed again leaves the new claim alone.
pub async fn test_reclaimed_job_not_clobbered<S>(store: S)
where
    S: JobStore,
{
    store.add(job("j1").with_lease(secs(5))).await.unwrap();
    store.reserve("w1", t(0)).await.unwrap().unwrap();
    assert_eq!(store.requeue_expired(t(5)).await.unwrap(), 1);

    let reclaimed = store.reserve("w2", t(6)).await.unwrap().unwrap();
    assert_eq!(reclaimed.expires, Some(t(11)));

    assert_eq!(store.requeue_expired(t(7)).await.unwrap(), 0);
    let job = store.get_by_id("j1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.worker_id.as_deref(), Some("w2"));
    assert_eq!(job.attempts, 1);
}

/// Recovery only ever touches processing jobs.
pub async fn test_recovery_skips_other_states<S>(store: S)
where
    S: JobStore,
{
    store
        .add(job("ready").with_lease(secs(1)).with_stall_timeout(secs(1)))
        .await
        .unwrap();
    store
        .update_by_id(
            "ready",
            &JobPatch::new().expires(Some(t(0))).stalls(Some(t(0))),
        )
        .await
        .unwrap();

    store
        .add(job("done").with_lease(secs(1)).with_stall_timeout(secs(1)))
        .await
        .unwrap();
    store
        .update_by_id(
            "done",
            &JobPatch::new()
                .status(JobStatus::Done)
                .expires(Some(t(0)))
                .stalls(Some(t(0))),
        )
        .await
        .unwrap();

    assert_eq!(store.requeue_expired(t(100)).await.unwrap(), 0);
    assert_eq!(store.requeue_stalled(t(100)).await.unwrap(), 0);

    for id in ["ready", "done"] {
        let job = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 0);
    }
}

/// Without lease or stall durations a reserved job carries no deadline to recover on.
pub async fn test_jobs_without_deadlines_stay_reserved<S>(store: S)
where
    S: JobStore,
{
    store.add(job("j1")).await.unwrap();
    let reserved = store.reserve("w1", t(0)).await.unwrap().unwrap();
    assert_eq!(reserved.expires, None);
    assert_eq!(reserved.stalls, None);

    assert_eq!(store.requeue_expired(t(10_000)).await.unwrap(), 0);
    assert_eq!(store.requeue_stalled(t(10_000)).await.unwrap(), 0);
}

/// A job added with `Duration::MAX` is clamped and still moves through reserve, renew and
/// recovery without disturbing the rest of the queue.
pub async fn test_longest_durations_stay_usable<S>(store: S)
where
    S: JobStore,
{
    let longest = Duration::milliseconds(MAX_DURATION_MS);
    store
        .add(
            job("forever")
                .with_lease(std::time::Duration::MAX)
                .with_stall_timeout(secs(10))
                .created_at(t(0)),
        )
        .await
        .unwrap();
    store.add(job("normal").created_at(t(1))).await.unwrap();

    let reserved = store.reserve("w1", t(2)).await.unwrap().unwrap();
    assert_eq!(reserved.id, "forever");
    assert_eq!(reserved.expire_ms, Some(MAX_DURATION_MS));
    assert_eq!(reserved.expires, Some(t(2) + longest));
    assert_eq!(reserved.stalls, Some(t(12)));
    assert_eq!(store.get(&JobFilter::new()).await.unwrap().len(), 2);

    let renewed = store.renew_lease("forever", "w1", t(5)).await.unwrap();
    assert_eq!(renewed.expires, Some(t(5) + longest));
    assert_eq!(store.requeue_expired(t(1_000)).await.unwrap(), 0);
    assert_eq!(store.requeue_stalled(t(12)).await.unwrap(), 1);

    let requeued = store.get_by_id("forever").await.unwrap().unwrap();
    assert_eq!(requeued.status, JobStatus::Ready);
    assert_eq!(requeued.attempts, 1);

    let again = store.reserve("w2", t(13)).await.unwrap().unwrap();
    assert_eq!(again.id, "forever");
    assert_eq!(again.expires, Some(t(13) + longest));
    let next = store.reserve("w3", t(13)).await.unwrap().unwrap();
    assert_eq!(next.id, "normal");
    assert!(store.reserve("w4", t(13)).await.unwrap().is_none());
}

/// Running the bootstrap again neither fails nor loses data.
pub async fn test_bootstrap_idempotent<S>(store: S)
where
    S: JobStore,
{
    store.init_schema().await.unwrap();
    store.init_schema().await.unwrap();

    store.add(job("survivor").with_lease(secs(5))).await.unwrap();
    store.init_schema().await.unwrap();

    let job = store.get_by_id("survivor").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Ready);

    // The claim routine is still in place after reinstalling it.
    let reserved = store.reserve("w", t(0)).await.unwrap().unwrap();
    assert_eq!(reserved.id, "survivor");
}

/// A payload comes back equal to what was added.
pub async fn test_add_get_roundtrip<S>(store: S)
where
    S: JobStore,
{
    let payload = TestPayload::default();
    let added = store
        .add(
            NewJob::from_payload(&payload)
                .unwrap()
                .with_name("roundtrip")
                .created_at(t(0)),
        )
        .await
        .unwrap();

    let fetched = store.get_by_id(&added.id).await.unwrap().unwrap();
    assert_eq!(fetched, added);
    assert_eq!(fetched.name.as_deref(), Some("roundtrip"));
    assert_eq!(fetched.created, t(0));
    assert_eq!(fetched.status, JobStatus::Ready);
    assert_eq!(fetched.attempts, 0);
    assert_eq!(fetched.payload::<TestPayload>().unwrap(), payload);

    assert!(store.get_by_id("missing").await.unwrap().is_none());
}

pub async fn test_duplicate_id_rejected<S>(store: S)
where
    S: JobStore,
{
    store.add(job("dup")).await.unwrap();
    let err = store.add(job("dup")).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId { ref id } if id == "dup"));
    assert_eq!(store.count(&JobFilter::new()).await.unwrap(), 1);
}

pub async fn test_update_by_id<S>(store: S)
where
    S: JobStore,
{
    store.add(job("j1").with_lease(secs(5))).await.unwrap();
    store.reserve("w1", t(0)).await.unwrap().unwrap();

    let updated = store
        .update_by_id(
            "j1",
            &JobPatch::new()
                .name(Some("renamed".to_string()))
                .data(json!({"step": 2}))
                .expire_ms(Some(9_000)),
        )
        .await
        .unwrap();
    assert_eq!(updated.name.as_deref(), Some("renamed"));
    assert_eq!(updated.data, json!({"step": 2}));
    assert_eq!(updated.expire_ms, Some(9_000));
    assert_eq!(updated.status, JobStatus::Processing);
    assert_eq!(updated.worker_id.as_deref(), Some("w1"));

    let released = store
        .update_by_id("j1", &JobPatch::new().status(JobStatus::Ready))
        .await
        .unwrap();
    assert_eq!(released.status, JobStatus::Ready);
    assert_eq!(released.worker_id, None);
    // Manual releases are not recoveries.
    assert_eq!(released.attempts, 0);

    let fetched = store.get_by_id("j1").await.unwrap().unwrap();
    assert_eq!(fetched, released);
}

/// Single-row mutations of missing jobs fail; empty patches are refused.
pub async fn test_update_by_id_precision<S>(store: S)
where
    S: JobStore,
{
    let err = store
        .update_by_id("missing", &JobPatch::new().status(JobStatus::Done))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::RowCount {
            expected: 1,
            affected: 0,
            ..
        }
    ));

    store.add(job("j1")).await.unwrap();
    let err = store.update_by_id("j1", &JobPatch::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::EmptyUpdate));

    let err = store.complete("missing").await.unwrap_err();
    assert!(matches!(err, StoreError::RowCount { affected: 0, .. }));
}

/// Patches that would break the worker/status pairing or carry an unusable duration are refused
/// and leave the job as it was.
pub async fn test_update_rejects_inconsistent_patch<S>(store: S)
where
    S: JobStore,
{
    store.add(job("j1").with_lease(secs(5))).await.unwrap();
    let reserved = store.reserve("w1", t(0)).await.unwrap().unwrap();

    for patch in [
        JobPatch::new().status(JobStatus::Processing),
        JobPatch::new().worker_id(None),
        JobPatch::new()
            .status(JobStatus::Ready)
            .worker_id(Some("w2".to_string())),
        JobPatch::new().expire_ms(Some(i64::MAX)),
        JobPatch::new().stall_ms(Some(-5)),
    ] {
        let err = store.update_by_id("j1", &patch).await.unwrap_err();
        assert!(
            matches!(err, StoreError::InvalidUpdate { .. }),
            "{patch:?} gave {err:?}"
        );
    }
    assert_eq!(store.get_by_id("j1").await.unwrap().unwrap(), reserved);

    let handed_over = store
        .update_by_id(
            "j1",
            &JobPatch::new()
                .status(JobStatus::Processing)
                .worker_id(Some("w2".to_string())),
        )
        .await
        .unwrap();
    assert_eq!(handed_over.status, JobStatus::Processing);
    assert_eq!(handed_over.worker_id.as_deref(), Some("w2"));
    assert_eq!(handed_over.attempts, 0);
}

pub async fn test_remove_operations<S>(store: S)
where
    S: JobStore,
{
    for id in ["a", "b", "c", "d"] {
        store.add(job(id).with_name("batch")).await.unwrap();
    }

    assert_eq!(store.remove_by_status(JobStatus::Done).await.unwrap(), 0);
    store.complete("a").await.unwrap();
    assert_eq!(store.remove_by_status(JobStatus::Done).await.unwrap(), 1);

    assert!(store.remove_by_id("b").await.unwrap());
    let err = store.remove_by_id("b").await.unwrap_err();
    assert!(matches!(err, StoreError::RowCount { affected: 0, .. }));

    assert_eq!(
        store
            .remove(&JobFilter::new().name("nothing-here"))
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .remove(&JobFilter::new().name("batch").id("c"))
            .await
            .unwrap(),
        1
    );

    assert_eq!(store.clear().await.unwrap(), 1);
    assert_eq!(store.clear().await.unwrap(), 0);
    assert_eq!(store.count(&JobFilter::new()).await.unwrap(), 0);
}

pub async fn test_filters_and_count<S>(store: S)
where
    S: JobStore,
{
    store
        .add(job("a").with_name("email").created_at(t(0)))
        .await
        .unwrap();
    store
        .add(job("b").with_name("email").created_at(t(1)))
        .await
        .unwrap();
    store
        .add(job("c").with_name("resize").created_at(t(2)))
        .await
        .unwrap();
    store.reserve("w1", t(3)).await.unwrap().unwrap();

    let all = store.get(&JobFilter::new()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    let emails = store.get(&JobFilter::new().name("email")).await.unwrap();
    assert_eq!(emails.len(), 2);

    let held = store
        .get(
            &JobFilter::new()
                .status(JobStatus::Processing)
                .worker_id("w1"),
        )
        .await
        .unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].id, "a");

    // Every predicate must hold.
    let none = store
        .get(&JobFilter::new().name("resize").status(JobStatus::Processing))
        .await
        .unwrap();
    assert!(none.is_empty());

    assert_eq!(store.count(&JobFilter::new()).await.unwrap(), 3);
    assert_eq!(
        store
            .count(&JobFilter::new().status(JobStatus::Ready))
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        store
            .count(&JobFilter::new().attempts(0).name("email"))
            .await
            .unwrap(),
        2
    );
}

/// After close, calls fail with a connectivity error instead of pretending the queue is empty.
pub async fn test_closed_store_rejects_calls<S>(store: S)
where
    S: JobStore,
{
    store.add(job("j1")).await.unwrap();
    store.close().await;

    let err = store.reserve("w", Utc::now()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotOpen));
    assert!(err.is_connectivity());

    let err = store.add(job("j2")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotOpen));
}

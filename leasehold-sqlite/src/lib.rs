//! SQLite implementation of the JobStore trait from leasehold.
//!
//! Timestamps are stored as Unix milliseconds. Reservation is a single `UPDATE … RETURNING`
//! statement, which SQLite serializes behind its write lock.

mod errors;
pub mod schema;
pub mod store;
mod types;

pub use store::SqliteJobStore;

#[cfg(test)]
mod test {
    use crate::store::SqliteJobStore;
    use leasehold::core::events::{NoopSink, StoreEvent};
    use leasehold::core::job::{JobFilter, JobStatus, NewJob};
    use leasehold::core::options::StoreOptions;
    use leasehold::core::store::JobStore;
    use leasehold::core::{Duration as ChronoDuration, Utc};
    use leasehold::prelude::StoreError;
    use leasehold::runner::sweeper::{Sweeper, SweeperOptions};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    #[allow(dead_code)]
    pub fn setup_logger() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    async fn memory_store() -> SqliteJobStore {
        SqliteJobStore::open_in_memory(StoreOptions::default(), Arc::new(NoopSink))
            .await
            .unwrap()
    }

    fn temp_db_path(tag: &str) -> std::path::PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir().join(format!(
            "leasehold-{tag}-{}-{nanos}.db",
            std::process::id()
        ))
    }

    fn remove_db_files(path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }

    #[tokio::test]
    async fn open_and_close_report_events() {
        let (tx, mut rx) = broadcast::channel(8);
        let store = SqliteJobStore::open_in_memory(StoreOptions::default(), Arc::new(tx))
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Opened);

        store.add(NewJob::new(json!(1)).with_id("j1")).await.unwrap();
        store.reserve("w1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Reserved {
                id: "j1".to_string(),
                worker_id: "w1".to_string()
            }
        );

        store.close().await;
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Closed);
    }

    #[tokio::test]
    async fn recover_reports_event_only_when_jobs_move() {
        let (tx, mut rx) = broadcast::channel(8);
        let store = memory_store().await.with_events(Arc::new(tx));
        let now = Utc::now();

        assert_eq!(store.requeue_expired(now).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());

        store
            .add(NewJob::new(json!(null)).with_id("j1").with_lease(Duration::from_secs(1)))
            .await
            .unwrap();
        store.reserve("w1", now).await.unwrap().unwrap();
        let _ = rx.try_recv();

        let count = store
            .requeue_expired(now + ChronoDuration::seconds(2))
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Recovered {
                kind: leasehold::core::recovery::RecoveryKind::Lease,
                count: 1
            }
        );
    }

    #[tokio::test]
    async fn open_without_bootstrap_leaves_schema_alone() {
        let store = SqliteJobStore::open_in_memory(
            StoreOptions::new().init_schema(false),
            Arc::new(NoopSink),
        )
        .await
        .unwrap();

        assert!(store.get_by_id("missing").await.is_err());
        store.init_schema().await.unwrap();
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn default_durations_apply_on_add() {
        let store = SqliteJobStore::open_in_memory(
            StoreOptions::new()
                .default_lease(Duration::from_secs(30))
                .default_stall(Duration::from_secs(300)),
            Arc::new(NoopSink),
        )
        .await
        .unwrap();

        let job = store.add(NewJob::new(json!(null))).await.unwrap();
        assert_eq!(job.expire_ms, Some(30_000));
        assert_eq!(job.stall_ms, Some(300_000));

        let explicit = store
            .add(NewJob::new(json!(null)).with_lease(Duration::from_millis(250)))
            .await
            .unwrap();
        assert_eq!(explicit.expire_ms, Some(250));
        assert_eq!(explicit.stall_ms, Some(300_000));
    }

    #[tokio::test]
    async fn undecodable_payload_is_reported() {
        let store = memory_store().await;
        sqlx::query(
            "INSERT INTO leasehold_jobs (id, created, status, attempts, data)
             VALUES ('broken', 0, 'ready', 0, 'not json')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.get_by_id("broken").await.unwrap_err();
        match err {
            StoreError::DeserializeError {
                job_id,
                payload_sample,
                ..
            } => {
                assert_eq!(job_id, "broken");
                assert_eq!(payload_sample, "not json");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_database_is_shared_between_pools() {
        let path = temp_db_path("shared");
        let url = format!("sqlite://{}", path.display());

        let first = SqliteJobStore::open(&url, StoreOptions::default(), Arc::new(NoopSink))
            .await
            .unwrap();
        let second = SqliteJobStore::open(&url, StoreOptions::default(), Arc::new(NoopSink))
            .await
            .unwrap();

        first
            .add(NewJob::new(json!({"n": 1})).with_id("j1"))
            .await
            .unwrap();
        let claimed = second.reserve("w2", Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, "j1");
        assert!(first.reserve("w1", Utc::now()).await.unwrap().is_none());

        first.close().await;
        second.close().await;
        remove_db_files(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pools_never_share_a_job() {
        let path = temp_db_path("contention");
        let url = format!("sqlite://{}", path.display());

        let mut stores = Vec::new();
        for _ in 0..4 {
            let store = SqliteJobStore::open(
                &url,
                StoreOptions::new().max_connections(4),
                Arc::new(NoopSink),
            )
            .await
            .unwrap();
            stores.push(store);
        }
        for i in 0..20 {
            stores[0]
                .add(NewJob::new(json!(i)).with_id(format!("job-{i:02}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = stores[i % stores.len()].clone();
            handles.push(tokio::spawn(async move {
                store.reserve(&format!("worker-{i}"), Utc::now()).await
            }));
        }

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap().unwrap() {
                claimed.push(job.id);
            }
        }
        let unique: HashSet<_> = claimed.iter().cloned().collect();
        assert_eq!(claimed.len(), 20, "claimed: {claimed:?}");
        assert_eq!(unique.len(), 20);
        assert_eq!(
            stores[1]
                .count(&JobFilter::new().status(JobStatus::Processing))
                .await
                .unwrap(),
            20
        );

        for store in &stores {
            store.close().await;
        }
        remove_db_files(&path);
    }

    #[tokio::test]
    async fn sweep_once_requeues_both_kinds() {
        let store = memory_store().await;
        let then = Utc::now() - ChronoDuration::hours(1);
        store
            .add(
                NewJob::new(json!(null))
                    .with_id("leased")
                    .with_lease(Duration::from_secs(5))
                    .created_at(then),
            )
            .await
            .unwrap();
        store
            .add(
                NewJob::new(json!(null))
                    .with_id("stalled")
                    .with_stall_timeout(Duration::from_secs(5))
                    .created_at(then + ChronoDuration::seconds(1)),
            )
            .await
            .unwrap();
        store.reserve("w1", then).await.unwrap().unwrap();
        store.reserve("w2", then).await.unwrap().unwrap();

        let sweeper = Sweeper::new(store.clone(), SweeperOptions::default());
        let report = sweeper.sweep_once(Utc::now()).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.stalled, 1);
        assert_eq!(report.total(), 2);

        let ready = store
            .count(&JobFilter::new().status(JobStatus::Ready))
            .await
            .unwrap();
        assert_eq!(ready, 2);
        let requeued = store
            .get(&JobFilter::new().attempts(1))
            .await
            .unwrap();
        assert_eq!(requeued.len(), 2);
        assert!(requeued.iter().all(|job| job.worker_id.is_none()));
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let store = Arc::new(memory_store().await);
        store
            .add(
                NewJob::new(json!(null))
                    .with_id("j1")
                    .with_lease(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        store
            .reserve("w1", Utc::now() - ChronoDuration::minutes(1))
            .await
            .unwrap()
            .unwrap();

        let sweeper = Sweeper::from_arc(
            store.clone(),
            SweeperOptions::new(Duration::from_millis(10), Duration::from_millis(10)),
        );
        let token = CancellationToken::new();
        let handle = {
            let token = token.clone();
            tokio::spawn(async move { sweeper.run_until_cancelled(token).await })
        };

        let requeued = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = store.get_by_id("j1").await.unwrap().unwrap();
                if job.status == JobStatus::Ready {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(requeued.attempts, 1);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown_future() {
        let store = memory_store().await;
        let sweeper = Sweeper::new(
            store,
            SweeperOptions::new(Duration::from_millis(10), Duration::from_millis(10)),
        );
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            sweeper
                .run_with_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reserve_next_waits_for_a_job() {
        let store = Arc::new(memory_store().await);
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .reserve_next("w1", ChronoDuration::milliseconds(10))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .add(NewJob::new(json!("late")).with_id("late"))
            .await
            .unwrap();

        let job = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(job.id, "late");
        assert_eq!(job.worker_id.as_deref(), Some("w1"));
    }

    // Generate all shared integration test specs for SQLite
    leasehold::generate_store_spec_tests! {
        backend = "sqlite",
        test_attrs = [#[tokio::test]],
        args = (),
        setup = memory_store().await
    }
}

//! PostgreSQL implementation of the JobStore trait from leasehold.
//!
//! Reservations go through the `leasehold_reserve` SQL function installed by
//! [`JobStore::init_schema`](leasehold::core::store::JobStore::init_schema), so the claim runs
//! entirely inside the database.

mod errors;
pub mod schema;
pub mod store;
mod types;

pub use store::PostgresJobStore;

#[cfg(test)]
mod test {
    use crate::store::PostgresJobStore;
    use leasehold::core::events::StoreEvent;
    use leasehold::core::options::StoreOptions;
    use leasehold::core::store::JobStore;
    use leasehold::prelude::StoreError;
    use sqlx::PgPool;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    #[allow(dead_code)]
    pub fn setup_logger() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    async fn store_with_schema(pool: PgPool) -> PostgresJobStore {
        let store = PostgresJobStore::with_pool(pool);
        store.init_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn open_unreachable_server_reports_connection_error() {
        let (tx, mut rx) = broadcast::channel(4);
        let options = StoreOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(500));

        let result =
            PostgresJobStore::open("postgres://leasehold@127.0.0.1:1/leasehold", options, Arc::new(tx))
                .await;

        let err = result.err().unwrap();
        assert!(err.is_connectivity(), "unexpected error: {err:?}");
        assert!(matches!(rx.try_recv().unwrap(), StoreEvent::Error { .. }));
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a PostgreSQL server in DATABASE_URL"]
    async fn concurrent_bootstrap_is_tolerated(pool: PgPool) {
        let stores: Vec<_> = (0..4)
            .map(|_| PostgresJobStore::with_pool(pool.clone()))
            .collect();
        let handles: Vec<_> = stores
            .into_iter()
            .map(|store| tokio::spawn(async move { store.init_schema().await }))
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a PostgreSQL server in DATABASE_URL"]
    async fn reserve_survives_concurrent_bootstrap(pool: PgPool) {
        let store = store_with_schema(pool).await;
        for i in 0..20 {
            store
                .add(leasehold::core::job::NewJob::new(serde_json::json!(i)))
                .await
                .unwrap();
        }

        let bootstrapper = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    store.init_schema().await.unwrap();
                }
            })
        };
        let mut claimed = 0;
        for i in 0..40 {
            if store
                .reserve(&format!("w{i}"), leasehold::core::Utc::now())
                .await
                .unwrap()
                .is_some()
            {
                claimed += 1;
            }
        }
        bootstrapper.await.unwrap();
        assert_eq!(claimed, 20);
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a PostgreSQL server in DATABASE_URL"]
    async fn reserve_reports_event(pool: PgPool) {
        let (tx, mut rx) = broadcast::channel(4);
        let store = store_with_schema(pool).await.with_events(Arc::new(tx));
        store
            .add(leasehold::core::job::NewJob::new(serde_json::json!(1)).with_id("j1"))
            .await
            .unwrap();
        store
            .reserve("w1", leasehold::core::Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Reserved {
                id: "j1".to_string(),
                worker_id: "w1".to_string()
            }
        );
    }

    #[sqlx::test(migrations = false)]
    #[ignore = "requires a PostgreSQL server in DATABASE_URL"]
    async fn default_durations_apply_on_add(pool: PgPool) {
        let store = store_with_schema(pool).await.with_options(
            StoreOptions::new()
                .default_lease(Duration::from_secs(30))
                .default_stall(Duration::from_secs(300)),
        );
        let job = store
            .add(leasehold::core::job::NewJob::new(serde_json::json!(null)))
            .await
            .unwrap();
        assert_eq!(job.expire_ms, Some(30_000));
        assert_eq!(job.stall_ms, Some(300_000));

        let err = store
            .add(leasehold::core::job::NewJob::new(serde_json::json!(null)).with_id(job.id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
    }

    // Generate all shared integration test specs for PostgreSQL
    leasehold::generate_store_spec_tests! {
        backend = "pg",
        test_attrs = [
            #[sqlx::test(migrations = false)]
            #[ignore = "requires a PostgreSQL server in DATABASE_URL"]
        ],
        args = (pool: PgPool),
        setup = store_with_schema(pool).await
    }
}

//! Idempotent schema bootstrap for SQLite.
//!
//! SQLite has no stored routines. The claim that Postgres installs as a function is issued by
//! the store as one `UPDATE … RETURNING` statement instead, which SQLite runs under its
//! single-writer lock.

use crate::errors::{classify, is_duplicate_object};
use leasehold::core::error::StoreError;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

pub const JOBS_TABLE: &str = "leasehold_jobs";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS leasehold_jobs (
    id TEXT PRIMARY KEY NOT NULL,
    worker_id TEXT,
    name TEXT,
    created INTEGER NOT NULL,
    expires INTEGER,
    expire_ms INTEGER,
    stalls INTEGER,
    stall_ms INTEGER,
    status TEXT NOT NULL DEFAULT 'ready'
        CHECK (status IN ('ready', 'processing', 'done', 'failed')),
    attempts INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL
)";

const CREATE_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_idx ON leasehold_jobs (status)",
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_created_idx ON leasehold_jobs (status, created, id)",
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_expires_idx ON leasehold_jobs (status, expires)",
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_stalls_idx ON leasehold_jobs (status, stalls)",
];

#[instrument(skip_all, err)]
pub(crate) async fn init(pool: &SqlitePool) -> Result<(), StoreError> {
    execute_tolerant(pool, CREATE_TABLE, "Failed to create jobs table").await?;
    for statement in CREATE_INDEXES {
        execute_tolerant(pool, statement, "Failed to create jobs index").await?;
    }
    Ok(())
}

async fn execute_tolerant(
    pool: &SqlitePool,
    statement: &'static str,
    context: &'static str,
) -> Result<(), StoreError> {
    match sqlx::query(statement).execute(pool).await {
        Ok(_) => Ok(()),
        Err(e) if is_duplicate_object(&e) => {
            debug!(error = %e, "Schema object already exists, skipping");
            Ok(())
        }
        Err(e) => Err(classify(e, context)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn every_statement_is_guarded() {
        assert!(CREATE_TABLE.contains(JOBS_TABLE));
        assert!(CREATE_TABLE.contains("IF NOT EXISTS"));
        for statement in CREATE_INDEXES {
            assert!(statement.contains("IF NOT EXISTS"));
            assert!(statement.contains(JOBS_TABLE));
        }
    }

    #[tokio::test]
    async fn init_creates_indexes_once() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init(&pool).await.unwrap();
        init(&pool).await.unwrap();

        let indexes: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND name LIKE 'leasehold_%' ORDER BY name",
        )
        .bind(JOBS_TABLE)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            indexes,
            vec![
                "leasehold_jobs_status_created_idx",
                "leasehold_jobs_status_expires_idx",
                "leasehold_jobs_status_idx",
                "leasehold_jobs_status_stalls_idx",
            ]
        );
    }
}

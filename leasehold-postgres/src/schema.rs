//! Idempotent schema bootstrap for PostgreSQL.

use crate::errors::{classify, is_duplicate_object};
use leasehold::core::error::StoreError;
use sqlx::PgPool;
use tracing::{debug, instrument};

pub const JOBS_TABLE: &str = "leasehold_jobs";
pub const RESERVE_FUNCTION: &str = "leasehold_reserve";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS leasehold_jobs (
    id VARCHAR(64) PRIMARY KEY,
    worker_id TEXT,
    name TEXT,
    created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    expires TIMESTAMPTZ,
    expire_ms BIGINT,
    stalls TIMESTAMPTZ,
    stall_ms BIGINT,
    status VARCHAR(16) NOT NULL DEFAULT 'ready'
        CHECK (status IN ('ready', 'processing', 'done', 'failed')),
    attempts BIGINT NOT NULL DEFAULT 0,
    data TEXT NOT NULL
)";

const CREATE_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_idx ON leasehold_jobs (status)",
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_created_idx ON leasehold_jobs (status, created, id)",
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_expires_idx ON leasehold_jobs (status, expires)",
    "CREATE INDEX IF NOT EXISTS leasehold_jobs_status_stalls_idx ON leasehold_jobs (status, stalls)",
];

const DROP_RESERVE: &str = "DROP FUNCTION IF EXISTS leasehold_reserve(TEXT, TIMESTAMPTZ)";

// Claims the oldest ready row not locked by a concurrent claim, in one statement. The outer
// `status = 'ready'` is re-checked against the locked row.
const CREATE_RESERVE: &str = "CREATE FUNCTION leasehold_reserve(p_worker_id TEXT, p_now TIMESTAMPTZ)
RETURNS SETOF leasehold_jobs
LANGUAGE sql
AS $$
    UPDATE leasehold_jobs AS j
    SET status = 'processing',
        worker_id = p_worker_id,
        expires = COALESCE(p_now + j.expire_ms * INTERVAL '1 millisecond', j.expires),
        stalls = COALESCE(p_now + j.stall_ms * INTERVAL '1 millisecond', j.stalls)
    WHERE j.id = (
        SELECT id FROM leasehold_jobs
        WHERE status = 'ready'
        ORDER BY created ASC, id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    AND j.status = 'ready'
    RETURNING j.*
$$";

/// Create the jobs table, its indexes and the claim function.
///
/// The function is dropped and recreated every time so an upgraded binary always installs its
/// own version. Both steps share one transaction, so concurrent reservations see either the old
/// function or the new one. Errors caused by another process creating the same object first are
/// ignored.
#[instrument(skip_all, err)]
pub(crate) async fn init(pool: &PgPool) -> Result<(), StoreError> {
    execute_tolerant(pool, CREATE_TABLE, "Failed to create jobs table").await?;
    for statement in CREATE_INDEXES {
        execute_tolerant(pool, statement, "Failed to create jobs index").await?;
    }
    replace_reserve_function(pool).await
}

async fn replace_reserve_function(pool: &PgPool) -> Result<(), StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| classify(e, "Failed to start reserve function swap"))?;

    let swapped = match sqlx::query(DROP_RESERVE).execute(&mut *tx).await {
        Ok(_) => sqlx::query(CREATE_RESERVE).execute(&mut *tx).await,
        Err(e) => Err(e),
    };
    match swapped {
        Ok(_) => tx
            .commit()
            .await
            .map_err(|e| classify(e, "Failed to commit reserve function")),
        Err(e) if is_duplicate_object(&e) => {
            debug!(error = %e, "Reserve function installed concurrently, skipping");
            tx.rollback()
                .await
                .map_err(|e| classify(e, "Failed to roll back reserve function swap"))
        }
        Err(e) => Err(classify(e, "Failed to replace reserve function")),
    }
}

async fn execute_tolerant(
    pool: &PgPool,
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

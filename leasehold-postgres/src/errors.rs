use leasehold::core::error::StoreError;

/// Errors that mean the database could not be reached, rather than that it refused the request.
pub(crate) fn is_connectivity(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// SQLSTATEs raised when an object the bootstrap creates already exists, including the
/// catalog unique violation Postgres reports when two sessions race on `IF NOT EXISTS`.
const DUPLICATE_OBJECT_CODES: [&str; 4] = ["42P07", "42710", "42723", "23505"];

pub(crate) fn is_duplicate_object(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| DUPLICATE_OBJECT_CODES.contains(&code.as_ref())),
        _ => false,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Wrap a sqlx error with `context`, sorting it into connectivity or plain database failures.
pub(crate) fn classify(err: sqlx::Error, context: &'static str) -> StoreError {
    if is_connectivity(&err) {
        StoreError::Connection(anyhow::Error::new(err).context(context))
    } else {
        StoreError::DatabaseError(anyhow::Error::new(err).context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_connectivity() {
        assert!(is_connectivity(&sqlx::Error::PoolTimedOut));
        assert!(is_connectivity(&sqlx::Error::PoolClosed));
        assert!(!is_connectivity(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn classify_keeps_context() {
        let err = classify(sqlx::Error::PoolTimedOut, "Failed to reserve a job");
        assert!(matches!(err, StoreError::Connection(_)));
        assert!(err.to_string().contains("Failed to reserve a job"));

        let err = classify(sqlx::Error::RowNotFound, "Failed to fetch job");
        assert!(matches!(err, StoreError::DatabaseError(_)));
    }

    #[test]
    fn non_database_errors_are_not_duplicates() {
        assert!(!is_duplicate_object(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolClosed));
    }
}

use leasehold::core::error::StoreError;

pub(crate) fn is_connectivity(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// SQLite has no dedicated code for an object that already exists, only the message.
pub(crate) fn is_duplicate_object(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("already exists"))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

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
    fn classify_sorts_errors() {
        assert!(matches!(
            classify(sqlx::Error::PoolClosed, "ctx"),
            StoreError::Connection(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::RowNotFound, "ctx"),
            StoreError::DatabaseError(_)
        ));
    }
}

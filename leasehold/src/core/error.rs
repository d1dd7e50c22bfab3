use thiserror::Error;

use crate::core::codec::CodecError;

/// How many characters of an undecodable payload are kept in [`StoreError::DeserializeError`].
const PAYLOAD_SAMPLE_CHARS: usize = 500;

/// Errors returned by [`JobStore`](crate::core::store::JobStore) implementations.
///
/// "No job available" is never an error: `reserve` returns `Ok(None)` for that, so callers
/// can tell an empty queue apart from a store they could not reach.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The store handle was closed.
    #[error("Job store is not open")]
    NotOpen,

    /// The database could not be reached or the connection dropped mid-call.
    #[error("Job store connection error: {0}")]
    Connection(#[source] anyhow::Error),

    /// A job with the same id already exists.
    #[error("Job {id} already exists")]
    DuplicateId { id: String },

    /// A statement aimed at a single row touched a different number of rows.
    #[error("Expected {expected} row(s) affected for job {id}, but {affected} were")]
    RowCount {
        id: String,
        expected: u64,
        affected: u64,
    },

    /// `update_by_id` was called with a patch that sets nothing.
    #[error("Update contains no fields")]
    EmptyUpdate,

    /// `update_by_id` was called with a patch that would leave the job inconsistent.
    #[error("Invalid update: {reason}")]
    InvalidUpdate { reason: String },

    /// Failed to pack a payload with the configured codec.
    #[error("Failed to serialize payload for job {job_id}: {error}")]
    SerializeError {
        job_id: String,
        #[source]
        error: CodecError,
    },

    /// Failed to unpack a stored payload.
    #[error("Failed to deserialize payload for job {job_id}: {error}\nPayload sample (first {payload_size} bytes): {payload_sample}")]
    DeserializeError {
        job_id: String,
        #[source]
        error: CodecError,
        payload_sample: String,
        payload_size: usize,
    },

    /// A stored row could not be mapped back into a [`JobRecord`](crate::core::job::JobRecord).
    #[error("Job {id} has an invalid row: {reason}")]
    InvalidRow { id: String, reason: String },

    /// Database or other backend error.
    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),
}

impl StoreError {
    /// Create a deserialization error with payload context.
    ///
    /// Includes a sample of the payload (first 500 chars) for debugging.
    pub fn deserialize_error(job_id: impl Into<String>, payload: &[u8], error: CodecError) -> Self {
        let payload_size = payload.len();
        let payload_sample = String::from_utf8_lossy(payload)
            .chars()
            .take(PAYLOAD_SAMPLE_CHARS)
            .collect();

        Self::DeserializeError {
            job_id: job_id.into(),
            error,
            payload_sample,
            payload_size,
        }
    }

    /// Create a serialize error for the given job.
    pub fn serialize_error(job_id: impl Into<String>, error: CodecError) -> Self {
        Self::SerializeError {
            job_id: job_id.into(),
            error,
        }
    }

    /// Check the affected-row count of a statement that targets exactly one row.
    pub fn expect_one_row(id: &str, affected: u64) -> Result<(), Self> {
        if affected == 1 {
            Ok(())
        } else {
            Err(Self::RowCount {
                id: id.to_string(),
                expected: 1,
                affected,
            })
        }
    }

    pub fn invalid_row(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRow {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the store being unreachable, as opposed to a bad request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::NotOpen | Self::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    fn json_error(input: &[u8]) -> CodecError {
        serde_json::from_slice::<serde_json::Value>(input)
            .unwrap_err()
            .into()
    }

    #[test]
    fn deserialize_error_formatting() {
        let payload = b"{\"invalid\": json}";
        let error = StoreError::deserialize_error("job-1", payload, json_error(payload));

        let error_msg = error.to_string();
        assert!(error_msg.contains("job-1"));
        assert!(error_msg.contains("invalid"));
    }

    #[test]
    fn deserialize_error_truncates_sample() {
        let large_payload = "x".repeat(1000);
        let error = StoreError::deserialize_error(
            "job-1",
            large_payload.as_bytes(),
            json_error(large_payload.as_bytes()),
        );

        let error_msg = error.to_string();
        assert!(error_msg.contains("1000"));
        let sample_count = error_msg.matches('x').count();
        assert!(
            (500..=510).contains(&sample_count),
            "Expected ~500 'x' chars, got {}",
            sample_count
        );
    }

    #[test]
    fn deserialize_error_handles_invalid_utf8() {
        let invalid_utf8: &[u8] = &[0xFF, 0xFE, 0xFD];
        let error = StoreError::deserialize_error("job-2", invalid_utf8, json_error(invalid_utf8));

        assert!(error.to_string().contains("job-2"));
    }

    #[test]
    fn expect_one_row() {
        assert!(StoreError::expect_one_row("a", 1).is_ok());

        let err = StoreError::expect_one_row("a", 0).unwrap_err();
        assert!(matches!(
            err,
            StoreError::RowCount {
                expected: 1,
                affected: 0,
                ..
            }
        ));
        assert!(err.to_string().contains("0 were"));

        let err = StoreError::expect_one_row("a", 2).unwrap_err();
        assert!(matches!(err, StoreError::RowCount { affected: 2, .. }));
    }

    #[test]
    fn connectivity_classification() {
        assert!(StoreError::NotOpen.is_connectivity());
        assert!(StoreError::Connection(anyhow::anyhow!("reset by peer")).is_connectivity());
        assert!(!StoreError::EmptyUpdate.is_connectivity());
        assert!(!StoreError::DuplicateId { id: "j1".into() }.is_connectivity());
    }

    #[test]
    fn source_chain() {
        let error = StoreError::DatabaseError(anyhow::anyhow!("Root cause"));
        assert!(error.source().is_some());

        let error = StoreError::Connection(anyhow::anyhow!("refused"));
        assert!(error.source().is_some());

        let error = StoreError::serialize_error("j1", json_error(b"nope"));
        assert!(error.source().is_some());
    }
}

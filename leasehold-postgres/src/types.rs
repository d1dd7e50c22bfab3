use leasehold::core::codec::PayloadCodec;
use leasehold::core::error::StoreError;
use leasehold::core::job::{JobRecord, JobStatus};
use leasehold::core::DateTime;
use sqlx::FromRow;

/// One row of `leasehold_jobs` as Postgres returns it.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobRow {
    pub(crate) id: String,
    pub(crate) worker_id: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) created: DateTime,
    pub(crate) expires: Option<DateTime>,
    pub(crate) expire_ms: Option<i64>,
    pub(crate) stalls: Option<DateTime>,
    pub(crate) stall_ms: Option<i64>,
    pub(crate) status: String,
    pub(crate) attempts: i64,
    pub(crate) data: String, // packed by the store's codec
}

impl JobRow {
    pub(crate) fn into_record(self, codec: &dyn PayloadCodec) -> Result<JobRecord, StoreError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::invalid_row(self.id.as_str(), e.to_string()))?;
        let attempts = u32::try_from(self.attempts).map_err(|_| {
            StoreError::invalid_row(self.id.as_str(), format!("attempts out of range: {}", self.attempts))
        })?;
        let data = codec
            .unpack(&self.data)
            .map_err(|e| StoreError::deserialize_error(self.id.as_str(), self.data.as_bytes(), e))?;

        Ok(JobRecord {
            id: self.id,
            worker_id: self.worker_id,
            name: self.name,
            created: self.created,
            expires: self.expires,
            expire_ms: self.expire_ms,
            stalls: self.stalls,
            stall_ms: self.stall_ms,
            status,
            attempts,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasehold::core::codec::JsonCodec;
    use leasehold::core::Utc;
    use serde_json::json;

    fn row() -> JobRow {
        JobRow {
            id: "j1".into(),
            worker_id: Some("w1".into()),
            name: None,
            created: Utc::now(),
            expires: None,
            expire_ms: Some(5_000),
            stalls: None,
            stall_ms: None,
            status: "processing".into(),
            attempts: 2,
            data: r#"{"k":[1,2]}"#.into(),
        }
    }

    #[test]
    fn maps_row_to_record() {
        let record = row().into_record(&JsonCodec).unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.data, json!({"k": [1, 2]}));
    }

    #[test]
    fn rejects_unknown_status() {
        let mut bad = row();
        bad.status = "cancelled".into();
        let err = bad.into_record(&JsonCodec).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRow { .. }));
    }

    #[test]
    fn reports_undecodable_payload() {
        let mut bad = row();
        bad.data = "{oops".into();
        let err = bad.into_record(&JsonCodec).unwrap_err();
        assert!(matches!(err, StoreError::DeserializeError { payload_size: 5, .. }));
    }
}

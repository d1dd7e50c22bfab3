use leasehold::core::codec::PayloadCodec;
use leasehold::core::error::StoreError;
use leasehold::core::job::{JobRecord, JobStatus};
use leasehold::core::DateTime;
use sqlx::types::chrono::TimeZone;
use sqlx::FromRow;

/// One row of `leasehold_jobs`. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct JobRow {
    pub(crate) id: String,
    pub(crate) worker_id: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) created: i64,
    pub(crate) expires: Option<i64>,
    pub(crate) expire_ms: Option<i64>,
    pub(crate) stalls: Option<i64>,
    pub(crate) stall_ms: Option<i64>,
    pub(crate) status: String,
    pub(crate) attempts: i64,
    pub(crate) data: String,
}

// Helper to convert SQLite INTEGER (Unix timestamp in milliseconds) to DateTime
pub(crate) fn timestamp_to_datetime(id: &str, ts_ms: i64) -> Result<DateTime, StoreError> {
    sqlx::types::chrono::Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .ok_or_else(|| StoreError::invalid_row(id, format!("timestamp out of range: {ts_ms}")))
}

// Helper to convert DateTime to SQLite INTEGER (Unix timestamp in milliseconds)
pub(crate) fn datetime_to_timestamp(dt: DateTime) -> i64 {
    dt.timestamp_millis()
}

impl JobRow {
    pub(crate) fn into_record(self, codec: &dyn PayloadCodec) -> Result<JobRecord, StoreError> {
        let id = self.id.as_str();
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::invalid_row(id, e.to_string()))?;
        let attempts = u32::try_from(self.attempts).map_err(|_| {
            StoreError::invalid_row(id, format!("attempts out of range: {}", self.attempts))
        })?;
        let created = timestamp_to_datetime(id, self.created)?;
        let expires = self
            .expires
            .map(|ts| timestamp_to_datetime(id, ts))
            .transpose()?;
        let stalls = self
            .stalls
            .map(|ts| timestamp_to_datetime(id, ts))
            .transpose()?;
        let data = codec
            .unpack(&self.data)
            .map_err(|e| StoreError::deserialize_error(id, self.data.as_bytes(), e))?;

        Ok(JobRecord {
            id: self.id,
            worker_id: self.worker_id,
            name: self.name,
            created,
            expires,
            expire_ms: self.expire_ms,
            stalls,
            stall_ms: self.stall_ms,
            status,
            attempts,
            data,
        })
    }
}

use crate::errors::{classify, is_unique_violation};
use crate::schema;
use crate::types::{datetime_to_timestamp, JobRow};
use async_trait::async_trait;
use leasehold::core::codec::{JsonCodec, PayloadCodec};
use leasehold::core::error::StoreError;
use leasehold::core::events::{EventSink, StoreEvent, TracingSink};
use leasehold::core::job::{ColumnValue, JobFilter, JobPatch, JobRecord, NewJob};
use leasehold::core::options::StoreOptions;
use leasehold::core::recovery::RecoveryKind;
use leasehold::core::store::JobStore;
use leasehold::core::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

/// An implementation of the JobStore backed by SQLite
#[derive(Clone)]
pub struct SqliteJobStore {
    pub(crate) pool: SqlitePool,
    codec: Arc<dyn PayloadCodec>,
    events: Arc<dyn EventSink>,
    options: StoreOptions,
}

impl SqliteJobStore {
    /// Wrap an existing pool. The schema is not touched; call `init_schema` if needed.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            codec: Arc::new(JsonCodec),
            events: Arc::new(TracingSink),
            options: StoreOptions::default(),
        }
    }

    /// Open (creating if missing) the database at `url`, e.g. `sqlite://jobs.db`.
    #[instrument(skip_all, err)]
    pub async fn open(
        url: &str,
        options: StoreOptions,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, StoreError> {
        let connect_options = match SqliteConnectOptions::from_str(url) {
            Ok(connect_options) => connect_options
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(options.get_acquire_timeout()),
            Err(e) => {
                let err = classify(e, "Invalid SQLite connection string");
                events.notify(StoreEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };
        let pool_options = SqlitePoolOptions::new()
            .max_connections(options.get_max_connections())
            .acquire_timeout(options.get_acquire_timeout());

        Self::connect(pool_options, connect_options, options, events).await
    }

    /// Open a private in-memory database.
    ///
    /// The database lives only as long as its connection, so the pool is pinned to exactly one
    /// connection that never idles out.
    #[instrument(skip_all, err)]
    pub async fn open_in_memory(
        options: StoreOptions,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, StoreError> {
        let connect_options = match SqliteConnectOptions::from_str("sqlite::memory:") {
            Ok(connect_options) => connect_options,
            Err(e) => return Err(classify(e, "Invalid SQLite connection string")),
        };
        let pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(options.get_acquire_timeout());

        Self::connect(pool_options, connect_options, options, events).await
    }

    async fn connect(
        pool_options: SqlitePoolOptions,
        connect_options: SqliteConnectOptions,
        options: StoreOptions,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, StoreError> {
        let pool = match pool_options.connect_with(connect_options).await {
            Ok(pool) => pool,
            Err(e) => {
                let err = classify(e, "Failed to open SQLite database");
                events.notify(StoreEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let store = Self {
            pool,
            codec: Arc::new(JsonCodec),
            events,
            options,
        };
        if store.options.should_init_schema() {
            if let Err(e) = store.init_schema().await {
                store.events.notify(StoreEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        }
        store.events.notify(StoreEvent::Opened);
        Ok(store)
    }

    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replace the job defaults. Pool settings only apply through [`open`](Self::open).
    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.pool.is_closed() {
            Err(StoreError::NotOpen)
        } else {
            Ok(())
        }
    }

    fn check<T>(
        &self,
        result: Result<T, sqlx::Error>,
        context: &'static str,
    ) -> Result<T, StoreError> {
        result.map_err(|e| {
            let err = classify(e, context);
            if let StoreError::Connection(source) = &err {
                self.events.notify(StoreEvent::Error {
                    message: format!("{source:#}"),
                });
            }
            err
        })
    }

    fn to_record(&self, row: JobRow) -> Result<JobRecord, StoreError> {
        row.into_record(self.codec.as_ref())
    }

    fn push_value(
        &self,
        builder: &mut QueryBuilder<'static, Sqlite>,
        job_id: &str,
        value: ColumnValue<'_>,
    ) -> Result<(), StoreError> {
        match value {
            ColumnValue::Text(text) => builder.push_bind(text.map(str::to_owned)),
            ColumnValue::Timestamp(ts) => builder.push_bind(ts.map(datetime_to_timestamp)),
            ColumnValue::Integer(n) => builder.push_bind(n),
            ColumnValue::Status(status) => builder.push_bind(status.as_str()),
            ColumnValue::Data(data) => {
                let packed = self
                    .codec
                    .pack(data)
                    .map_err(|e| StoreError::serialize_error(job_id, e))?;
                builder.push_bind(packed)
            }
        };
        Ok(())
    }

    fn push_filter(
        &self,
        builder: &mut QueryBuilder<'static, Sqlite>,
        filter: &JobFilter,
    ) -> Result<(), StoreError> {
        for (i, (column, value)) in filter.predicates().into_iter().enumerate() {
            builder.push(if i == 0 { " WHERE " } else { " AND " });
            builder.push(column).push(" = ");
            self.push_value(builder, "<filter>", value)?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        schema::init(&self.pool).await
    }

    async fn close(&self) {
        self.pool.close().await;
        self.events.notify(StoreEvent::Closed);
    }

    #[instrument(skip_all, err, fields(job_id = %job.id()))]
    async fn add(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        self.ensure_open()?;
        let job = job.apply_defaults(&self.options);
        let data = self
            .codec
            .pack(job.data())
            .map_err(|e| StoreError::serialize_error(job.id(), e))?;
        let created = job.created().unwrap_or_else(Utc::now);

        let inserted = sqlx::query_as::<_, JobRow>(
            "INSERT INTO leasehold_jobs (id, name, created, expire_ms, stall_ms, status, attempts, data)
             VALUES (?1, ?2, ?3, ?4, ?5, 'ready', 0, ?6)
             RETURNING *",
        )
        .bind(job.id())
        .bind(job.name())
        .bind(datetime_to_timestamp(created))
        .bind(job.expire_ms())
        .bind(job.stall_ms())
        .bind(data)
        .fetch_one(&self.pool)
        .await;

        let row = match inserted {
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::DuplicateId {
                    id: job.id().to_string(),
                })
            }
            other => self.check(other, "Failed to add job to the store")?,
        };
        self.to_record(row)
    }

    #[instrument(skip_all, err, fields(job_id = %id))]
    async fn get_by_id(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        self.ensure_open()?;
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM leasehold_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;
        self.check(row, "Failed to fetch job")?
            .map(|row| self.to_record(row))
            .transpose()
    }

    #[instrument(skip_all, err)]
    async fn get(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError> {
        self.ensure_open()?;
        let mut builder = QueryBuilder::new("SELECT * FROM leasehold_jobs");
        self.push_filter(&mut builder, filter)?;
        builder.push(" ORDER BY created ASC, id ASC");

        let rows = builder
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await;
        self.check(rows, "Failed to query jobs")?
            .into_iter()
            .map(|row| self.to_record(row))
            .collect()
    }

    #[instrument(skip_all, err)]
    async fn count(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM leasehold_jobs");
        self.push_filter(&mut builder, filter)?;

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await;
        Ok(self.check(count, "Failed to count jobs")?.max(0) as u64)
    }

    #[instrument(skip_all, err, fields(job_id = %id))]
    async fn update_by_id(&self, id: &str, patch: &JobPatch) -> Result<JobRecord, StoreError> {
        self.ensure_open()?;
        if patch.is_empty() {
            return Err(StoreError::EmptyUpdate);
        }
        patch.validate()?;

        let mut builder = QueryBuilder::new("UPDATE leasehold_jobs SET ");
        for (i, (column, value)) in patch.assignments().into_iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(column).push(" = ");
            self.push_value(&mut builder, id, value)?;
        }
        builder
            .push(" WHERE id = ")
            .push_bind(id.to_string())
            .push(" RETURNING *");

        let row = builder
            .build_query_as::<JobRow>()
            .fetch_optional(&self.pool)
            .await;
        match self.check(row, "Failed to update job")? {
            Some(row) => self.to_record(row),
            None => Err(StoreError::RowCount {
                id: id.to_string(),
                expected: 1,
                affected: 0,
            }),
        }
    }

    #[instrument(skip_all, err, fields(job_id = %id))]
    async fn remove_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let result = sqlx::query("DELETE FROM leasehold_jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await;
        let result = self.check(result, "Failed to remove job from the store")?;
        StoreError::expect_one_row(id, result.rows_affected())?;
        Ok(true)
    }

    #[instrument(skip_all, err, ret)]
    async fn remove(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let mut builder = QueryBuilder::new("DELETE FROM leasehold_jobs");
        self.push_filter(&mut builder, filter)?;

        let result = builder.build().execute(&self.pool).await;
        Ok(self
            .check(result, "Failed to remove jobs from the store")?
            .rows_affected())
    }

    #[instrument(skip_all, err, ret)]
    async fn clear(&self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let result = sqlx::query("DELETE FROM leasehold_jobs")
            .execute(&self.pool)
            .await;
        Ok(self.check(result, "Failed to clear the store")?.rows_affected())
    }

    #[instrument(skip_all, err, fields(worker_id = %worker_id))]
    async fn reserve(
        &self,
        worker_id: &str,
        now: DateTime,
    ) -> Result<Option<JobRecord>, StoreError> {
        self.ensure_open()?;
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE leasehold_jobs
             SET status = 'processing',
                 worker_id = ?1,
                 expires = COALESCE(?2 + expire_ms, expires),
                 stalls = COALESCE(?2 + stall_ms, stalls)
             WHERE id = (
                 SELECT id FROM leasehold_jobs
                 WHERE status = 'ready'
                 ORDER BY created ASC, id ASC
                 LIMIT 1
             )
             AND status = 'ready'
             RETURNING *",
        )
        .bind(worker_id)
        .bind(datetime_to_timestamp(now))
        .fetch_optional(&self.pool)
        .await;

        let Some(row) = self.check(row, "Failed to reserve a job from the store")? else {
            return Ok(None);
        };
        let record = self.to_record(row)?;
        self.events.notify(StoreEvent::Reserved {
            id: record.id.clone(),
            worker_id: worker_id.to_string(),
        });
        Ok(Some(record))
    }

    #[instrument(skip_all, err, fields(job_id = %id, worker_id = %worker_id))]
    async fn renew_lease(
        &self,
        id: &str,
        worker_id: &str,
        now: DateTime,
    ) -> Result<JobRecord, StoreError> {
        self.ensure_open()?;
        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE leasehold_jobs
             SET expires = COALESCE(?3 + expire_ms, expires)
             WHERE id = ?1 AND worker_id = ?2 AND status = 'processing'
             RETURNING *",
        )
        .bind(id)
        .bind(worker_id)
        .bind(datetime_to_timestamp(now))
        .fetch_optional(&self.pool)
        .await;

        match self.check(row, "Failed to renew job lease")? {
            Some(row) => self.to_record(row),
            None => Err(StoreError::RowCount {
                id: id.to_string(),
                expected: 1,
                affected: 0,
            }),
        }
    }

    #[instrument(skip_all, err, ret, fields(kind = %kind))]
    async fn recover(&self, kind: RecoveryKind, now: DateTime) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let deadline = kind.deadline_column();
        let duration = kind.duration_column();
        let statement = format!(
            "UPDATE leasehold_jobs
             SET status = 'ready',
                 worker_id = NULL,
                 attempts = attempts + 1,
                 {deadline} = ?1 + {duration}
             WHERE status = 'processing' AND {deadline} <= ?1"
        );

        let result = sqlx::query(&statement)
            .bind(datetime_to_timestamp(now))
            .execute(&self.pool)
            .await;
        let count = self
            .check(result, "Failed to requeue overdue jobs")?
            .rows_affected();
        if count > 0 {
            self.events.notify(StoreEvent::Recovered { kind, count });
        }
        Ok(count)
    }
}

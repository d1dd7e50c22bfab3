use std::time::Duration;

/// Connection and job defaults for opening a store.
///
/// # Examples
///
/// ```rust
/// use leasehold::core::options::StoreOptions;
/// use std::time::Duration;
///
/// let opts = StoreOptions::new()
///     .max_connections(4)
///     .default_lease(Duration::from_secs(30))
///     .default_stall(Duration::from_secs(600));
/// assert_eq!(opts.get_max_connections(), 4);
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct StoreOptions {
    pub(crate) max_connections: u32,
    pub(crate) acquire_timeout: Duration,
    pub(crate) default_lease: Option<Duration>,
    pub(crate) default_stall: Option<Duration>,
    pub(crate) init_schema: bool,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of pooled connections.
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// How long a call may wait for a pooled connection before failing with a connection error.
    pub fn acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Lease duration for jobs added without one.
    pub fn default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = Some(lease);
        self
    }

    /// Stall timeout for jobs added without one.
    pub fn default_stall(mut self, stall: Duration) -> Self {
        self.default_stall = Some(stall);
        self
    }

    /// Whether `open` runs the schema bootstrap. On by default.
    pub fn init_schema(mut self, init_schema: bool) -> Self {
        self.init_schema = init_schema;
        self
    }

    pub fn get_max_connections(&self) -> u32 {
        self.max_connections
    }

    pub fn get_acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Default lease in milliseconds, as stored in `expire_ms`.
    pub fn default_lease_ms(&self) -> Option<i64> {
        self.default_lease.map(duration_to_ms)
    }

    /// Default stall timeout in milliseconds, as stored in `stall_ms`.
    pub fn default_stall_ms(&self) -> Option<i64> {
        self.default_stall.map(duration_to_ms)
    }

    pub fn should_init_schema(&self) -> bool {
        self.init_schema
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            default_lease: None,
            default_stall: None,
            init_schema: true,
        }
    }
}

/// Longest lease or stall duration a job can carry, in milliseconds (about 100 years).
///
/// Deadlines are computed in the database as `now + duration`, which must stay inside the range
/// of a timestamp.
pub const MAX_DURATION_MS: i64 = 36_525 * 24 * 60 * 60 * 1_000;

/// Milliseconds in `duration`, clamped to [`MAX_DURATION_MS`].
pub fn duration_to_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis())
        .unwrap_or(i64::MAX)
        .min(MAX_DURATION_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = StoreOptions::default();
        assert_eq!(opts.get_max_connections(), 10);
        assert_eq!(opts.get_acquire_timeout(), Duration::from_secs(30));
        assert_eq!(opts.default_lease_ms(), None);
        assert_eq!(opts.default_stall_ms(), None);
        assert!(opts.should_init_schema());
    }

    #[test]
    fn chained() {
        let opts = StoreOptions::new()
            .acquire_timeout(Duration::from_millis(250))
            .default_lease(Duration::from_secs(5))
            .default_stall(Duration::from_secs(60))
            .init_schema(false);

        assert_eq!(opts.get_acquire_timeout(), Duration::from_millis(250));
        assert_eq!(opts.default_lease_ms(), Some(5_000));
        assert_eq!(opts.default_stall_ms(), Some(60_000));
        assert!(!opts.should_init_schema());
    }

    #[test]
    fn duration_to_ms_clamps() {
        assert_eq!(duration_to_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_to_ms(Duration::MAX), MAX_DURATION_MS);
        assert_eq!(
            duration_to_ms(Duration::from_millis(MAX_DURATION_MS as u64 + 1)),
            MAX_DURATION_MS
        );
    }
}

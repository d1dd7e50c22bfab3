#![doc = include_str!("../../README.md")]

pub mod core;

/// Shared test specifications for backend implementations.
///
/// These test functions ensure consistent behavior across all `JobStore` implementations
/// (PostgreSQL, SQLite). Backend tests expand them with [`generate_store_spec_tests!`].
#[doc(hidden)]
pub mod store_spec;

/// Background services built on top of a [`JobStore`](core::store::JobStore).
#[cfg(feature = "runner")]
pub mod runner {
    pub mod sweeper;
}

#[doc(hidden)]
pub use paste;

/// Re-exports to simplify importing this crate types.
pub mod prelude {
    pub use super::core::{
        codec::{JsonCodec, PayloadCodec},
        error::StoreError,
        events::{EventSink, StoreEvent, TracingSink},
        job::{JobFilter, JobPatch, JobRecord, JobStatus, NewJob},
        options::StoreOptions,
        recovery::RecoveryKind,
        store::JobStore,
        DateTime, Duration, Utc,
    };
    #[cfg(feature = "runner")]
    pub use super::runner::sweeper::{SweepReport, Sweeper, SweeperOptions};
    pub use serde::{Deserialize, Serialize};
}

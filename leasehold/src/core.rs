//! Backend agnostic job model, the `JobStore` trait and re-exports of 3rd party types used in the
//! public interface.

pub use uuid::Uuid;

/// An alias for `chrono::DateTime<chrono::Utc>`
pub type DateTime = chrono::DateTime<chrono::Utc>;
pub use chrono::{Duration, Utc};
pub use serde_json;
pub use tokio_util::sync::CancellationToken;

pub mod codec;
pub mod error;
pub mod events;
pub mod job;
pub mod options;
pub mod recovery;
pub mod store;

//! Lifecycle notifications reported to the hosting application.
//!
//! Errors from `open`/`close` have no caller waiting on them, so stores report them here
//! instead. Connectivity errors from in-flight calls are reported here as well as returned.

use crate::core::recovery::RecoveryKind;
use tokio::sync::broadcast;

/// Something the store wants the application to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreEvent {
    /// The store connected and the schema is in place.
    Opened,
    /// The store was closed. Further calls fail with `StoreError::NotOpen`.
    Closed,
    /// A connectivity or lifecycle error.
    Error { message: String },
    /// A worker reserved a job.
    Reserved { id: String, worker_id: String },
    /// A recovery scan returned jobs to `ready`.
    Recovered { kind: RecoveryKind, count: u64 },
}

/// Receives [`StoreEvent`]s. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: StoreEvent);
}

/// Default sink: writes every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: StoreEvent) {
        match event {
            StoreEvent::Opened => tracing::info!("Job store opened"),
            StoreEvent::Closed => tracing::info!("Job store closed"),
            StoreEvent::Error { message } => tracing::error!(%message, "Job store error"),
            StoreEvent::Reserved { id, worker_id } => {
                tracing::debug!(job_id = %id, %worker_id, "Job reserved")
            }
            StoreEvent::Recovered { kind, count } => {
                tracing::info!(%kind, count, "Requeued overdue jobs")
            }
        }
    }
}

/// Fan events out to any number of subscribers. Having no subscribers is not an error.
impl EventSink for broadcast::Sender<StoreEvent> {
    fn notify(&self, event: StoreEvent) {
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn notify(&self, _event: StoreEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_sink_delivers_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.notify(StoreEvent::Opened);
        tx.notify(StoreEvent::Recovered {
            kind: RecoveryKind::Stall,
            count: 3,
        });

        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Opened);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::Recovered {
                kind: RecoveryKind::Stall,
                count: 3
            }
        );
    }

    #[test]
    fn broadcast_sink_without_subscribers_is_silent() {
        let (tx, rx) = broadcast::channel::<StoreEvent>(1);
        drop(rx);
        tx.notify(StoreEvent::Closed);
    }
}

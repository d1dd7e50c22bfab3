use serde::{Deserialize, Serialize};
use std::fmt;

/// The two independent deadlines that can return a `processing` job to `ready`.
///
/// Each kind names the deadline column its scan compares against `now` and the duration column
/// used to push that deadline forward when the job is requeued. Backends build their recovery
/// statement from these names, so both scans share one code path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryKind {
    /// The lease (`expires`) lapsed without being renewed or finished.
    Lease,
    /// The hard stall deadline (`stalls`) passed, regardless of lease renewals.
    Stall,
}

impl RecoveryKind {
    pub const ALL: [RecoveryKind; 2] = [RecoveryKind::Lease, RecoveryKind::Stall];

    /// Column holding the deadline timestamp.
    pub fn deadline_column(self) -> &'static str {
        match self {
            RecoveryKind::Lease => "expires",
            RecoveryKind::Stall => "stalls",
        }
    }

    /// Column holding the duration in milliseconds used to recompute the deadline.
    pub fn duration_column(self) -> &'static str {
        match self {
            RecoveryKind::Lease => "expire_ms",
            RecoveryKind::Stall => "stall_ms",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryKind::Lease => "lease",
            RecoveryKind::Stall => "stall",
        }
    }
}

impl fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_do_not_overlap() {
        assert_eq!(RecoveryKind::Lease.deadline_column(), "expires");
        assert_eq!(RecoveryKind::Lease.duration_column(), "expire_ms");
        assert_eq!(RecoveryKind::Stall.deadline_column(), "stalls");
        assert_eq!(RecoveryKind::Stall.duration_column(), "stall_ms");
    }

    #[test]
    fn display_and_serde_agree() {
        for kind in RecoveryKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }
}

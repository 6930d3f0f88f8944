//! Selects snapshots that have outlived the retention threshold.

use chrono::{DateTime, Utc};

use crate::model::{RetentionPolicy, SnapshotRecord};

/// Returns the snapshots whose age in whole days is at least the policy's
/// lifetime. Pure filter: the empty result is the normal "nothing to delete"
/// outcome, and ordering carries no meaning.
#[must_use]
pub fn select_expired(
    snapshots: &[SnapshotRecord],
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<SnapshotRecord> {
    snapshots
        .iter()
        .filter(|snapshot| {
            let age_days = (now - snapshot.created_at).num_days();
            age_days >= i64::from(policy.lifetime_days())
        })
        .cloned()
        .collect()
}

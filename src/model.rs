//! Data model for instances, snapshots, and remote operations.
//!
//! All values here are ephemeral views over remote state: descriptors are
//! fetched fresh for every workflow step and discarded after use, and the
//! process holds no durable local state.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Remote instance state as reported by the compute API.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    /// Instance is running normally.
    Running,
    /// Instance is shutting down.
    Stopping,
    /// Instance is halted.
    Stopped,
    /// Instance resources are being allocated.
    Provisioning,
    /// Instance is being created.
    Creating,
    /// Instance is in a provider-side error state.
    Error,
    /// Instance has crashed.
    Crashed,
    /// Any state this tool does not recognise.
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    /// True for states where the instance is down or going down
    /// (stopped, stopping, error, crashed).
    #[must_use]
    pub const fn is_negative(self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Stopping | Self::Error | Self::Crashed
        )
    }

    /// True for states where the instance is up or coming up
    /// (running, provisioning, creating).
    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::Running | Self::Provisioning | Self::Creating)
    }

    /// Wire name of this state, matching the remote API spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Provisioning => "PROVISIONING",
            Self::Creating => "CREATING",
            Self::Error => "ERROR",
            Self::Crashed => "CRASHED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of remote instance metadata at fetch time.
///
/// Never cached across a workflow step boundary: the previous step may have
/// changed the remote state, so callers re-fetch before acting on it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceDescriptor {
    /// Provider identifier of the instance.
    pub id: String,
    /// Folder (project) the instance belongs to.
    pub folder_id: String,
    /// Human-readable instance name.
    pub name: String,
    /// Identifier of the boot disk; snapshots are taken from and matched
    /// against this disk.
    pub boot_disk_id: String,
    /// State reported by the provider at fetch time.
    pub state: InstanceState,
}

/// A snapshot as listed by the remote API.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRecord {
    /// Provider identifier of the snapshot.
    pub id: String,
    /// Snapshot name.
    pub name: String,
    /// Disk the snapshot was taken from.
    pub source_disk_id: String,
    /// Creation timestamp reported by the provider.
    pub created_at: DateTime<Utc>,
}

/// Handle for a remote long-running operation.
///
/// Every mutating call returns one of these. `NoOp` signals the call was
/// skipped on a guard condition (for example "already stopped") and must
/// short-circuit any waiter to an immediate success.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// A request was accepted and is tracked remotely under `id`.
    Issued {
        /// Remote operation identifier, polled until completion.
        id: String,
        /// Human-readable description of the operation.
        description: String,
    },
    /// The call was skipped because the instance was already in the
    /// desired state.
    NoOp,
}

/// Completion flag for an issued operation, re-fetched on every poll.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct OperationStatus {
    /// Whether the remote side reports the operation as finished.
    pub done: bool,
    /// Description echoed by the remote side.
    #[serde(default)]
    pub description: String,
}

/// Snapshot retention threshold in whole days.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetentionPolicy {
    lifetime_days: u32,
}

impl RetentionPolicy {
    /// Creates a policy. Returns `None` when `lifetime_days` is zero, which
    /// would expire every snapshot including ones taken moments ago.
    #[must_use]
    pub const fn new(lifetime_days: u32) -> Option<Self> {
        if lifetime_days == 0 {
            return None;
        }
        Some(Self { lifetime_days })
    }

    /// Retention threshold in days.
    #[must_use]
    pub const fn lifetime_days(self) -> u32 {
        self.lifetime_days
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { lifetime_days: 365 }
    }
}

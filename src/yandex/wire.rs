//! Serde payloads for the Yandex Cloud compute REST surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{InstanceDescriptor, InstanceState, SnapshotRecord};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InstanceBody {
    pub(super) id: String,
    pub(super) folder_id: String,
    pub(super) name: String,
    pub(super) boot_disk: BootDisk,
    pub(super) status: InstanceState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BootDisk {
    pub(super) disk_id: String,
}

impl From<InstanceBody> for InstanceDescriptor {
    fn from(value: InstanceBody) -> Self {
        Self {
            id: value.id,
            folder_id: value.folder_id,
            name: value.name,
            boot_disk_id: value.boot_disk.disk_id,
            state: value.status,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SnapshotListBody {
    #[serde(default)]
    pub(super) snapshots: Vec<SnapshotBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SnapshotBody {
    pub(super) id: String,
    pub(super) name: String,
    pub(super) source_disk_id: String,
    pub(super) created_at: DateTime<Utc>,
}

impl From<SnapshotBody> for SnapshotRecord {
    fn from(value: SnapshotBody) -> Self {
        Self {
            id: value.id,
            name: value.name,
            source_disk_id: value.source_disk_id,
            created_at: value.created_at,
        }
    }
}

/// Operation handle returned by every mutating call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OperationBody {
    pub(super) id: String,
    #[serde(default)]
    pub(super) description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ErrorBody {
    #[serde(default)]
    pub(super) message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateSnapshotBody<'a> {
    pub(super) folder_id: &'a str,
    pub(super) disk_id: &'a str,
    pub(super) name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TokenRequestBody<'a> {
    pub(super) yandex_passport_oauth_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TokenResponseBody {
    pub(super) iam_token: String,
}

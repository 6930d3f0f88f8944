//! Compute API abstraction consumed by the orchestration layer.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::{InstanceDescriptor, Operation, OperationStatus, SnapshotRecord};
use crate::retry::Transient;

/// Future returned by compute API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Errors raised by the remote compute API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// Raised when the connection to the remote endpoint fails.
    #[error("connection failed: {message}")]
    Connect {
        /// Transport-level error message.
        message: String,
    },
    /// Raised when a request exceeds the client timeout.
    #[error("request timed out: {message}")]
    Timeout {
        /// Transport-level error message.
        message: String,
    },
    /// Raised when snapshot creation is rejected with a quota error (429).
    #[error("quota exceeded: {message}")]
    Quota {
        /// Message returned by the remote side.
        message: String,
    },
    /// Raised for any other non-2xx response.
    #[error("{status} rejected by remote API: {message}")]
    Rejected {
        /// HTTP status code of the response.
        status: u16,
        /// Message carried in the response body.
        message: String,
    },
    /// Raised when a response body cannot be decoded.
    #[error("malformed response: {message}")]
    Malformed {
        /// Decoder error message.
        message: String,
    },
}

impl Transient for ApiError {
    /// Only transport-level failures are retry-eligible; rejections and
    /// quota errors reflect remote decisions and must propagate as-is.
    fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        let message = value.to_string();
        if value.is_timeout() {
            Self::Timeout { message }
        } else if value.is_decode() {
            Self::Malformed { message }
        } else {
            Self::Connect { message }
        }
    }
}

/// Remote compute API surface used by the workflows.
///
/// Every mutating call returns an [`Operation`] handle that an
/// [`crate::waiter::OperationWaiter`] consumes exactly once. Implementations
/// must map a 404 on [`get_instance`](Self::get_instance) to `Ok(None)`
/// rather than an error.
pub trait ComputeApi {
    /// Fetches the current descriptor of an instance, `None` when it does
    /// not exist.
    fn get_instance<'a>(&'a self, instance_id: &'a str)
    -> ApiFuture<'a, Option<InstanceDescriptor>>;

    /// Requests that an instance be started.
    fn start_instance<'a>(&'a self, instance_id: &'a str) -> ApiFuture<'a, Operation>;

    /// Requests that an instance be stopped.
    fn stop_instance<'a>(&'a self, instance_id: &'a str) -> ApiFuture<'a, Operation>;

    /// Requests creation of a snapshot of `disk_id` under `name`.
    fn create_snapshot<'a>(
        &'a self,
        folder_id: &'a str,
        disk_id: &'a str,
        name: &'a str,
    ) -> ApiFuture<'a, Operation>;

    /// Requests deletion of a snapshot.
    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ApiFuture<'a, Operation>;

    /// Lists every snapshot in a folder.
    fn list_snapshots<'a>(&'a self, folder_id: &'a str) -> ApiFuture<'a, Vec<SnapshotRecord>>;

    /// Re-fetches the completion flag of a long-running operation.
    fn get_operation<'a>(&'a self, operation_id: &'a str) -> ApiFuture<'a, OperationStatus>;
}

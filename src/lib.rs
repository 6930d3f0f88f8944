//! Core library for the snapwarden lifecycle tools.
//!
//! The crate automates snapshot creation and pruning for a fixed set of
//! cloud compute instances and ships a watchdog that restarts instances
//! found stopped. Orchestration is generic over the [`api::ComputeApi`]
//! seam; the [`yandex`] module provides the production implementation.

pub mod api;
pub mod cleaner;
pub mod config;
pub mod creator;
pub mod instance;
pub mod model;
pub mod retry;
pub mod selector;
pub mod test_support;
pub mod waiter;
pub mod watchdog;
pub mod yandex;

pub use api::{ApiError, ApiFuture, ComputeApi};
pub use cleaner::SnapshotCleaner;
pub use config::{AppConfig, ConfigError};
pub use creator::SnapshotCreator;
pub use instance::InstanceClient;
pub use model::{
    InstanceDescriptor, InstanceState, Operation, OperationStatus, RetentionPolicy, SnapshotRecord,
};
pub use retry::{RetryPolicy, Transient};
pub use selector::select_expired;
pub use waiter::{OperationWaiter, WaitOutcome};
pub use watchdog::Watchdog;
pub use yandex::{Endpoints, YandexCompute};

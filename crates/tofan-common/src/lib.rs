//! Common types for Tofan: CRDs, errors, events, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;
pub mod yaml;

pub use config::EngineConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by every Tofan CRD
pub const TOFAN_GROUP: &str = "tofan.io";

/// Finalizer placed on ObjectTemplates and TestCases so cleanup runs before removal
pub const TOFAN_FINALIZER: &str = "tofan.io/finalizer";

/// Label carried by every materialized resource, valued with the owning TestCase name
pub const TESTCASE_NAME_LABEL: &str = "tofan.io/testcase-name";

/// Namespace used for materialized resources whose manifest does not declare one
pub const DEFAULT_RESOURCE_NAMESPACE: &str = "default";

/// Default field manager for writes issued by the Tofan controllers
pub const DEFAULT_FIELD_MANAGER: &str = "tofan-controller";

/// Steady-state requeue interval (3 minutes)
pub const REQUEUE_SUCCESS_SECS: u64 = 180;

/// Requeue interval after a failed reconcile
pub const REQUEUE_ERROR_SECS: u64 = 30;

/// Interval between readiness polls of materialized resources
pub const READINESS_POLL_SECS: u64 = 30;

/// Build the label selector matching every resource owned by a TestCase
pub fn owner_label_selector(test_case: &str) -> String {
    format!("{}={}", TESTCASE_NAME_LABEL, test_case)
}

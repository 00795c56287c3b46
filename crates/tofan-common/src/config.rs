//! Engine configuration shared by the Tofan controllers

use std::time::Duration;

use crate::retry::RetryConfig;
use crate::{
    DEFAULT_FIELD_MANAGER, DEFAULT_RESOURCE_NAMESPACE, READINESS_POLL_SECS, REQUEUE_ERROR_SECS,
    REQUEUE_SUCCESS_SECS,
};

/// Tunables for reconciliation, readiness polling, and teardown
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Interval between readiness polls
    pub poll_interval: Duration,
    /// Requeue interval for healthy objects
    pub requeue_interval: Duration,
    /// Requeue interval after a failed reconcile
    pub error_requeue_interval: Duration,
    /// Namespace assigned to materialized resources that declare none
    pub default_namespace: String,
    /// Field manager recorded on status and finalizer patches
    pub field_manager: String,
    /// Retry policy for conflicting status writes
    pub status_retry: RetryConfig,
    /// Retry policy for teardown deletes
    pub teardown_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(READINESS_POLL_SECS),
            requeue_interval: Duration::from_secs(REQUEUE_SUCCESS_SECS),
            error_requeue_interval: Duration::from_secs(REQUEUE_ERROR_SECS),
            default_namespace: DEFAULT_RESOURCE_NAMESPACE.to_string(),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            status_retry: RetryConfig::for_status_writes(5),
            teardown_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 2.0,
            },
        }
    }
}

impl EngineConfig {
    /// Config with millisecond-scale intervals, for tests driving real timers
    pub fn for_testing() -> Self {
        let fast = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        };
        Self {
            poll_interval: Duration::from_millis(10),
            status_retry: fast.clone(),
            teardown_retry: fast,
            ..Default::default()
        }
    }
}

//! Operator command line
//!
//! Every flag also reads from a `TOFAN_*` environment variable so the
//! Deployment manifest can configure the operator without args.

use std::time::Duration;

use clap::{ArgAction, Parser};

use tofan_common::retry::RetryConfig;
use tofan_common::telemetry::{LogConfig, LogFormat};
use tofan_common::{
    EngineConfig, DEFAULT_FIELD_MANAGER, DEFAULT_RESOURCE_NAMESPACE, READINESS_POLL_SECS,
    REQUEUE_ERROR_SECS, REQUEUE_SUCCESS_SECS,
};

/// Tofan - executes TestCases against ObjectTemplates
#[derive(Parser, Debug)]
#[command(name = "tofan", version, about, long_about = None)]
pub struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Install or update the Tofan CRDs on startup
    #[arg(long, env = "TOFAN_INSTALL_CRDS", default_value_t = true, action = ArgAction::Set)]
    pub install_crds: bool,

    /// Seconds between readiness polls of materialized resources
    #[arg(long, env = "TOFAN_POLL_INTERVAL_SECS", default_value_t = READINESS_POLL_SECS)]
    pub poll_interval_secs: u64,

    /// Seconds between steady-state reconciles
    #[arg(long, env = "TOFAN_REQUEUE_SECS", default_value_t = REQUEUE_SUCCESS_SECS)]
    pub requeue_secs: u64,

    /// Seconds before retrying a failed reconcile
    #[arg(long, env = "TOFAN_ERROR_REQUEUE_SECS", default_value_t = REQUEUE_ERROR_SECS)]
    pub error_requeue_secs: u64,

    /// Namespace for materialized resources that declare none
    #[arg(long, env = "TOFAN_DEFAULT_NAMESPACE", default_value = DEFAULT_RESOURCE_NAMESPACE)]
    pub default_namespace: String,

    /// Field manager recorded on operator writes
    #[arg(long, env = "TOFAN_FIELD_MANAGER", default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    /// Attempts for a status write that keeps conflicting
    #[arg(long, env = "TOFAN_STATUS_RETRY_ATTEMPTS", default_value_t = 5)]
    pub status_retry_attempts: u32,

    /// Attempts for a failing teardown delete
    #[arg(long, env = "TOFAN_TEARDOWN_RETRY_ATTEMPTS", default_value_t = 3)]
    pub teardown_retry_attempts: u32,

    /// Log output format (text or json)
    #[arg(long, env = "TOFAN_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Engine tunables derived from the flags
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            requeue_interval: Duration::from_secs(self.requeue_secs),
            error_requeue_interval: Duration::from_secs(self.error_requeue_secs),
            default_namespace: self.default_namespace.clone(),
            field_manager: self.field_manager.clone(),
            status_retry: RetryConfig::for_status_writes(self.status_retry_attempts),
            teardown_retry: RetryConfig {
                max_attempts: self.teardown_retry_attempts,
                ..defaults.teardown_retry
            },
        }
    }

    /// Logging setup derived from the flags
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            ..Default::default()
        }
    }
}

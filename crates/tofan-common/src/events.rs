//! Kubernetes Event recording for Tofan controllers.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that controllers can emit standard Kubernetes Events visible via
//! `kubectl describe testcase` and `kubectl get events`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "ExecutionStarted")
    /// * `action` - What action was taken (e.g. "Materialize")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher for the given controller name.
    ///
    /// The controller name appears as the "reportingComponent" on Events
    /// (e.g. "tofan-testcase-controller").
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
///
/// These appear in `kubectl get events` under the REASON column.
pub mod reasons {
    // TestCase lifecycle
    /// TestCase accepted and waiting for its template
    pub const AWAITING_EXECUTION: &str = "AwaitingExecution";
    /// Referenced ObjectTemplate could not be fetched
    pub const TEMPLATE_NOT_FOUND: &str = "Cannot Find ObjectTemplateRef";
    /// Materialization pass started
    pub const EXECUTION_STARTED: &str = "ExecutionStarted";
    /// Every instance was written and the readiness poller is running
    pub const EXECUTION_SUCCESSFUL: &str = "ExecutionSuccessful";
    /// A store write failed and the TestCase entered Error
    pub const EXECUTION_FAILED: &str = "ExecutionFailed";
    /// An override pair could not be applied and was skipped
    pub const OVERRIDE_SKIPPED: &str = "OverrideSkipped";
    /// Every materialized resource reported ready
    pub const RESOURCES_READY: &str = "ResourcesReady";
    /// Owned resources were deleted
    pub const TEARDOWN_COMPLETE: &str = "TeardownComplete";
    /// Owned resources could not be deleted after retries
    pub const TEARDOWN_FAILED: &str = "TeardownFailed";

    // ObjectTemplate lifecycle
    /// Template GVK recorded in status
    pub const TEMPLATE_SYNCED: &str = "ObjectTemplateSyncSuccess";
    /// Template document lacks apiVersion or kind
    pub const INVALID_TEMPLATE: &str = "InvalidTemplate";
}

/// Well-known event action strings.
///
/// These appear in `kubectl get events` under the ACTION column.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Instantiating and writing resources
    pub const MATERIALIZE: &str = "Materialize";
    /// Polling resource readiness
    pub const POLL: &str = "Poll";
    /// Deleting owned resources
    pub const TEARDOWN: &str = "Teardown";
}

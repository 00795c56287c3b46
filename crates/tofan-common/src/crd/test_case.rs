//! TestCase CRD types
//!
//! A `TestCase` references an ObjectTemplate and lists the overrides to apply
//! to it. Each (path, value) override yields one materialized resource.
//!
//! Served as `v1alpha2`: DynamicField values are a map from key to arbitrary
//! JSON. The flat string-list shape of earlier releases is not accepted.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{any_json_map, Condition};

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of a TestCase
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TestCasePhase {
    /// Accepted, waiting for the referenced template
    Pending,
    /// Instantiating and materializing resources
    InProgress,
    /// Every override was materialized
    Completed,
    /// A store write failed during materialization
    Error,
}

impl TestCasePhase {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    /// Completed and Error end instantiation work
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Whether a status write may move from `self` to `next`.
    ///
    /// Staying put is always allowed. Otherwise the phase may only move
    /// forward, and never out of a terminal phase.
    pub fn can_advance_to(self, next: TestCasePhase) -> bool {
        self == next || (!self.is_terminal() && next.rank() > self.rank())
    }

    /// Same check with an unset current phase, which precedes every phase
    pub fn may_follow(current: Option<TestCasePhase>, next: TestCasePhase) -> bool {
        current.map_or(true, |c| c.can_advance_to(next))
    }
}

impl std::fmt::Display for TestCasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Error => write!(f, "Error"),
        }
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// Condition types and reasons written to TestCase status
pub mod conditions {
    /// All overrides materialized
    pub const READY: &str = "Ready";
    /// Materialization pass running
    pub const CREATING: &str = "Creating";
    /// Template missing or a store write failed
    pub const FAILED: &str = "Failed";

    /// Waiting to start
    pub const REASON_AWAITING_EXECUTION: &str = "AwaitingExecution";
    /// Materialization started
    pub const REASON_EXECUTION_STARTED: &str = "ExecutionStarted";
    /// Materialization finished
    pub const REASON_EXECUTION_SUCCESSFUL: &str = "ExecutionSuccessful";
    /// Materialization failed
    pub const REASON_EXECUTION_FAILED: &str = "ExecutionFailed";
    /// Referenced template could not be fetched
    pub const REASON_TEMPLATE_NOT_FOUND: &str = "Cannot Find ObjectTemplateRef";
    /// Every materialized resource reported ready
    pub const REASON_RESOURCES_READY: &str = "ResourcesReady";

    /// Message paired with the Pending phase
    pub const MESSAGE_PENDING: &str = "The TestCase is pending and has not started execution.";
    /// Message paired with the InProgress phase
    pub const MESSAGE_IN_PROGRESS: &str = "The TestCase is currently in progress.";
    /// Message paired with the Completed phase
    pub const MESSAGE_COMPLETED: &str = "The TestCase has completed successfully.";
    /// Message paired with the Error phase
    pub const MESSAGE_ERROR: &str = "The TestCase encountered an error during execution.";
}

// =============================================================================
// Spec
// =============================================================================

/// Reference to the ObjectTemplate a TestCase instantiates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTemplateRef {
    /// Template name, resolved in the TestCase's namespace
    pub name: String,
    /// Template kind (informational, always ObjectTemplate today)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Template API group (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// One override: a dot-delimited path and the values to place there
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicField {
    /// Dot-delimited path into the template (e.g. `spec.replicas`)
    pub path: String,
    /// Values keyed by an arbitrary label; each yields one resource
    #[serde(default)]
    #[schemars(schema_with = "any_json_map")]
    pub values: BTreeMap<String, serde_json::Value>,
}

/// Expected condition on a materialized resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionCriteria {
    /// Condition type (e.g. Available)
    #[serde(rename = "type")]
    pub type_: String,
    /// Expected status (e.g. "True")
    pub status: String,
    /// Optional JSONPath locating the condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
}

/// Readiness expectations for one resource type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessCriteria {
    /// Resource type the criteria apply to
    pub resource_type: String,
    /// Conditions expected on that type
    #[serde(default)]
    pub conditions: Vec<ConditionCriteria>,
}

/// Informational metric target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetMetric {
    /// Metric name
    pub name: String,
    /// Query expression
    pub expr: String,
}

/// Declarative test case over an ObjectTemplate
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tofan.io",
    version = "v1alpha2",
    kind = "TestCase",
    plural = "testcases",
    shortname = "tc",
    namespaced,
    status = "TestCaseStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseSpec {
    /// Template to instantiate
    pub object_template_ref: ObjectTemplateRef,

    /// Action tag (e.g. "create")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Requested instance count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,

    /// Concurrency hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,

    /// Overrides applied to the template
    #[serde(default)]
    pub dynamic_fields: Vec<DynamicField>,

    /// Declared readiness expectations, stored but not yet evaluated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_criteria: Vec<ReadinessCriteria>,

    /// Informational metric targets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_metrics: Vec<TargetMetric>,
}

/// Status of a TestCase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseStatus {
    /// Current phase; unset until the first reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<TestCasePhase>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Resources upserted by the last instantiation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialized: Option<u32>,

    /// Override pairs skipped for decode or path errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<u32>,

    /// Set once every materialized resource was observed ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_ready: Option<bool>,
}

impl TestCase {
    /// Current phase, `None` when unset
    pub fn phase(&self) -> Option<TestCasePhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Whether the readiness poller already observed every resource ready
    pub fn resources_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.resources_ready)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    mod phase_ordering {
        use super::*;
        use TestCasePhase::*;

        #[test]
        fn forward_moves_are_allowed() {
            assert!(Pending.can_advance_to(InProgress));
            assert!(InProgress.can_advance_to(Completed));
            assert!(InProgress.can_advance_to(Error));
            assert!(Pending.can_advance_to(Error));
        }

        #[test]
        fn regressions_are_rejected() {
            assert!(!InProgress.can_advance_to(Pending));
            assert!(!Completed.can_advance_to(InProgress));
            assert!(!Error.can_advance_to(Pending));
        }

        #[test]
        fn terminal_phases_are_final() {
            assert!(!Completed.can_advance_to(Error));
            assert!(!Error.can_advance_to(Completed));
            assert!(Completed.can_advance_to(Completed));
        }

        #[test]
        fn unset_precedes_everything() {
            assert!(TestCasePhase::may_follow(None, Pending));
            assert!(TestCasePhase::may_follow(None, Completed));
            assert!(!TestCasePhase::may_follow(Some(Completed), Pending));
        }
    }

    mod wire_shape {
        use super::*;

        #[test]
        fn dynamic_field_values_accept_any_json() {
            let spec: TestCaseSpec = serde_json::from_value(serde_json::json!({
                "objectTemplateRef": {"name": "web", "kind": "ObjectTemplate", "group": "tofan.io"},
                "action": "create",
                "count": 2,
                "dynamicFields": [{
                    "path": "spec.template.spec.containers",
                    "values": {
                        "replicas": 3,
                        "image": "nginx:1.27",
                        "containers": [{"name": "app"}],
                        "resources": {"limits": {"cpu": "1"}}
                    }
                }]
            }))
            .unwrap();

            let values = &spec.dynamic_fields[0].values;
            assert_eq!(values.len(), 4);
            assert_eq!(values["replicas"], 3);
            assert!(values["containers"].is_array());
            assert!(values["resources"].is_object());
        }

        #[test]
        fn string_list_values_are_rejected() {
            let result: Result<TestCaseSpec, _> = serde_json::from_value(serde_json::json!({
                "objectTemplateRef": {"name": "web"},
                "dynamicFields": [{"path": "spec.replicas", "values": ["1", "2"]}]
            }));
            assert!(result.is_err());
        }

        #[test]
        fn phase_serializes_by_name() {
            let status = TestCaseStatus {
                phase: Some(TestCasePhase::InProgress),
                ..Default::default()
            };
            let json = serde_json::to_value(&status).unwrap();
            assert_eq!(json["phase"], "InProgress");
            assert!(json.get("resourcesReady").is_none());
        }

        #[test]
        fn crd_is_served_as_v1alpha2() {
            let crd = serde_json::to_value(TestCase::crd()).unwrap();
            assert_eq!(crd["spec"]["versions"][0]["name"], "v1alpha2");
            assert_eq!(crd["spec"]["names"]["shortNames"][0], "tc");
        }
    }

    #[test]
    fn unset_status_reads_as_no_phase() {
        let tc = TestCase::new("load", TestCaseSpec::default());
        assert_eq!(tc.phase(), None);
        assert!(!tc.resources_ready());
    }
}

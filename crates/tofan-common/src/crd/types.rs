//! Shared types used by both Tofan CRDs

use chrono::{DateTime, Utc};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready, Creating, Failed)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Insert or update a condition, keyed by type.
///
/// When a condition of the same type exists with the same status, its
/// `lastTransitionTime` is kept and only reason and message are refreshed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.status == condition.status => {
            existing.reason = condition.reason;
            existing.message = condition.message;
        }
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Look up a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

// =============================================================================
// Schema helpers for free-form documents
// =============================================================================

const PRESERVE_UNKNOWN_FIELDS: &str = "x-kubernetes-preserve-unknown-fields";

fn preserve_unknown(instance_type: Option<InstanceType>) -> SchemaObject {
    let mut schema = SchemaObject {
        instance_type: instance_type.map(Into::into),
        ..Default::default()
    };
    schema
        .extensions
        .insert(PRESERVE_UNKNOWN_FIELDS.to_string(), serde_json::Value::Bool(true));
    schema
}

/// Schema for an arbitrary object whose fields the API server must keep
pub fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(preserve_unknown(Some(InstanceType::Object)))
}

/// Schema for a string-keyed map whose values may be any JSON
pub fn any_json_map(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.object().additional_properties =
        Some(Box::new(Schema::Object(preserve_unknown(None))));
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod conditions {
        use super::*;
        use chrono::TimeZone;

        fn epoch() -> DateTime<Utc> {
            Utc.timestamp_opt(0, 0).unwrap()
        }

        #[test]
        fn condition_serializes_with_kubernetes_field_names() {
            let condition = Condition::new("Ready", ConditionStatus::True, "Synced", "ok");
            let json = serde_json::to_value(&condition).unwrap();
            assert_eq!(json["type"], "Ready");
            assert_eq!(json["status"], "True");
            assert!(json.get("lastTransitionTime").is_some());
        }

        #[test]
        fn same_status_keeps_transition_time() {
            let mut conditions = Vec::new();
            let mut first = Condition::new("Ready", ConditionStatus::False, "Waiting", "a");
            first.last_transition_time = epoch();
            set_condition(&mut conditions, first);

            set_condition(
                &mut conditions,
                Condition::new("Ready", ConditionStatus::False, "StillWaiting", "b"),
            );

            assert_eq!(conditions.len(), 1);
            assert_eq!(conditions[0].reason, "StillWaiting");
            assert_eq!(conditions[0].last_transition_time, epoch());
        }

        #[test]
        fn status_change_replaces_condition() {
            let mut conditions = Vec::new();
            let mut first = Condition::new("Ready", ConditionStatus::False, "Waiting", "a");
            first.last_transition_time = epoch();
            set_condition(&mut conditions, first);

            set_condition(
                &mut conditions,
                Condition::new("Ready", ConditionStatus::True, "Done", "b"),
            );

            let ready = find_condition(&conditions, "Ready").unwrap();
            assert_eq!(ready.status, ConditionStatus::True);
            assert!(ready.last_transition_time > epoch());
        }

        #[test]
        fn distinct_types_accumulate() {
            let mut conditions = Vec::new();
            set_condition(
                &mut conditions,
                Condition::new("Creating", ConditionStatus::True, "r", "m"),
            );
            set_condition(
                &mut conditions,
                Condition::new("Ready", ConditionStatus::True, "r", "m"),
            );
            assert_eq!(conditions.len(), 2);
            assert!(find_condition(&conditions, "Failed").is_none());
        }
    }

    mod schemas {
        use super::*;

        #[test]
        fn object_schema_preserves_unknown_fields() {
            let mut gen = SchemaGenerator::default();
            let json = serde_json::to_value(preserve_unknown_object(&mut gen)).unwrap();
            assert_eq!(json["type"], "object");
            assert_eq!(json[PRESERVE_UNKNOWN_FIELDS], true);
        }

        #[test]
        fn map_values_are_untyped() {
            let mut gen = SchemaGenerator::default();
            let json = serde_json::to_value(any_json_map(&mut gen)).unwrap();
            assert_eq!(json["type"], "object");
            assert_eq!(json["additionalProperties"][PRESERVE_UNKNOWN_FIELDS], true);
            assert!(json["additionalProperties"].get("type").is_none());
        }
    }
}

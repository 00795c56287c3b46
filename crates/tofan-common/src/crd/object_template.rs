//! ObjectTemplate CRD types
//!
//! An `ObjectTemplate` holds a manifest skeleton that TestCases instantiate.
//! The controller records the skeleton's group/version/kind into status on
//! first successful sync.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{preserve_unknown_object, Condition};
use crate::kube_utils::{manifest_type, parse_api_version};

/// Reusable manifest skeleton for TestCases
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tofan.io",
    version = "v1alpha1",
    kind = "ObjectTemplate",
    plural = "objecttemplates",
    shortname = "ot",
    namespaced,
    status = "ObjectTemplateStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Group","type":"string","jsonPath":".status.group"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".status.kind"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTemplateSpec {
    /// Prefix for generated resource names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,

    /// Manifest skeleton, normally declaring its own apiVersion and kind
    #[schemars(schema_with = "preserve_unknown_object")]
    pub template: serde_json::Value,
}

/// Status of an ObjectTemplate. Every field is derived by the controller.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTemplateStatus {
    /// API group of the template's resource ("" for core)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// API version of the template's resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Kind of the template's resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Group, version and kind of the resources a template produces
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateGvk {
    /// API group ("" for the core group)
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
}

impl TemplateGvk {
    /// Derive from the apiVersion and kind declared by the template document
    pub fn from_template(template: &serde_json::Value) -> Option<Self> {
        let (api_version, kind) = manifest_type(template)?;
        let (group, version) = parse_api_version(&api_version);
        Some(Self {
            group,
            version,
            kind,
        })
    }
}

impl ObjectTemplate {
    /// Group/version/kind of the resources this template produces.
    ///
    /// Prefers the recorded status; falls back to the template document when
    /// the controller has not synced it yet.
    pub fn resource_gvk(&self) -> Option<TemplateGvk> {
        let recorded = self.status.as_ref().and_then(|s| {
            match (s.version.as_deref(), s.kind.as_deref()) {
                (Some(version), Some(kind)) if !version.is_empty() && !kind.is_empty() => {
                    Some(TemplateGvk {
                        group: s.group.clone().unwrap_or_default(),
                        version: version.to_string(),
                        kind: kind.to_string(),
                    })
                }
                _ => None,
            }
        });
        recorded.or_else(|| TemplateGvk::from_template(&self.spec.template))
    }
}

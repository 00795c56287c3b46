//! Shared Kubernetes utilities using kube-rs
//!
//! Helpers for working with resources whose kind is only known at runtime
//! (materialized test resources), plus finalizer and error-code plumbing
//! shared by both controllers.

use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde_json::Value;

// =============================================================================
// ApiResource building
// =============================================================================
//
// Materialized resources are addressed with `Api<DynamicObject>`, which needs
// an `ApiResource`. Tofan never runs discovery: the apiVersion and kind always
// come from a manifest or from an ObjectTemplate status, and the plural is
// derived locally with `pluralize_kind`.
// =============================================================================

/// Build an `ApiResource` from an apiVersion string and kind.
///
/// # Example
/// ```ignore
/// let ar = build_api_resource("apps/v1", "Deployment");
/// let api: Api<DynamicObject> = Api::namespaced_with(client, "default", &ar);
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Build an `ApiResource` from separate group, version and kind
///
/// An empty group addresses the core API (`v1`).
pub fn build_api_resource_from_gvk(group: &str, version: &str, kind: &str) -> ApiResource {
    build_api_resource(&join_api_version(group, version), kind)
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use tofan_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Join group and version back into an apiVersion string
pub fn join_api_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{}/{}", group, version)
    }
}

/// Read `apiVersion` and `kind` from a decoded manifest
///
/// Returns `None` unless both are present, non-empty strings.
pub fn manifest_type(manifest: &Value) -> Option<(String, String)> {
    let api_version = manifest.get("apiVersion")?.as_str()?;
    let kind = manifest.get("kind")?.as_str()?;
    if api_version.is_empty() || kind.is_empty() {
        return None;
    }
    Some((api_version.to_string(), kind.to_string()))
}

/// Kinds whose plural is not derivable from English rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("ingressclass", "ingressclasses"),
    ("storageclass", "storageclasses"),
    ("priorityclass", "priorityclasses"),
    ("runtimeclass", "runtimeclasses"),
    ("objecttemplate", "objecttemplates"),
    ("testcase", "testcases"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple
/// pluralization rules for everything else.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Finalizers
// =============================================================================

/// Check whether an object carries the given finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Merge patch adding `finalizer`, or `None` when it is already present
pub fn add_finalizer_patch<K: Resource>(obj: &K, finalizer: &str) -> Option<Value> {
    if has_finalizer(obj, finalizer) {
        return None;
    }
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    Some(serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    }))
}

/// Merge patch removing `finalizer`, or `None` when it is absent
pub fn remove_finalizer_patch<K: Resource>(obj: &K, finalizer: &str) -> Option<Value> {
    if !has_finalizer(obj, finalizer) {
        return None;
    }
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    Some(serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    }))
}

// =============================================================================
// API error codes
// =============================================================================

/// True when the API server answered 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True when the API server answered 409
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// `namespace/name` key for a namespaced object
pub fn namespaced_name<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

//! Teardown of materialized resources
//!
//! Everything a TestCase materialized carries its ownership label, so
//! teardown is one foreground collection delete per TestCase. A failure is
//! surfaced as a single error; the caller decides whether to retry.

use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::info;

use tofan_common::crd::{ObjectTemplate, TestCase};
use tofan_common::kube_utils::build_api_resource_from_gvk;
use tofan_common::{owner_label_selector, Error, Result};

use crate::store::ResourceStore;

/// Addressing for the resources a template produces
pub fn template_api_resource(template: &ObjectTemplate) -> Result<ApiResource> {
    let gvk = template.resource_gvk().ok_or_else(|| {
        Error::validation_for(
            format!("ObjectTemplate {}", template.name_any()),
            "template declares no apiVersion and kind",
        )
    })?;
    Ok(build_api_resource_from_gvk(&gvk.group, &gvk.version, &gvk.kind))
}

/// Namespace a TestCase's resources land in when their manifest names none.
///
/// Materialization, readiness polling and teardown all resolve it the same
/// way: the TestCase's own namespace, else `fallback`.
pub fn resource_namespace(test_case: &TestCase, fallback: &str) -> String {
    test_case
        .namespace()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// Delete every resource `test_case` materialized from `template`
pub async fn teardown(
    store: &dyn ResourceStore,
    test_case: &TestCase,
    template: &ObjectTemplate,
    default_namespace: &str,
) -> Result<()> {
    let api_resource = template_api_resource(template)?;
    let namespace = resource_namespace(test_case, default_namespace);
    let name = test_case.name_any();

    store
        .delete_collection(&api_resource, &namespace, &owner_label_selector(&name))
        .await?;

    info!(
        test_case = %name,
        kind = %api_resource.kind,
        namespace = %namespace,
        "Tore down materialized resources"
    );
    Ok(())
}

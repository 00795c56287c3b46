//! Kubernetes access for ObjectTemplates

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use tofan_common::crd::{ObjectTemplate, ObjectTemplateStatus};
use tofan_common::kube_utils::{add_finalizer_patch, remove_finalizer_patch};
use tofan_common::{Error, DEFAULT_FIELD_MANAGER, TOFAN_FINALIZER};

/// Trait abstracting Kubernetes client operations for ObjectTemplates
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TemplateClient: Send + Sync {
    /// Add the Tofan finalizer
    async fn add_finalizer(&self, template: &ObjectTemplate) -> Result<(), Error>;

    /// Remove the Tofan finalizer
    async fn remove_finalizer(&self, template: &ObjectTemplate) -> Result<(), Error>;

    /// Replace the template's status
    async fn patch_status(
        &self,
        template: &ObjectTemplate,
        status: &ObjectTemplateStatus,
    ) -> Result<(), Error>;
}

/// Merge patch replacing a template's status.
///
/// Unset GVK fields are written as explicit nulls so a merge clears any
/// previously recorded value.
pub fn status_patch(status: &ObjectTemplateStatus) -> serde_json::Value {
    let mut body = serde_json::to_value(status).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(fields) = body.as_object_mut() {
        for key in ["group", "version", "kind"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
    }
    serde_json::json!({ "status": body })
}

/// Real Kubernetes client implementation
pub struct TemplateClientImpl {
    client: Client,
    field_manager: String,
}

impl TemplateClientImpl {
    /// Create a new TemplateClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
        }
    }

    /// Override the field manager recorded on patches
    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    fn api(&self, template: &ObjectTemplate) -> Api<ObjectTemplate> {
        Api::namespaced(self.client.clone(), &template.namespace().unwrap_or_default())
    }

    fn describe(template: &ObjectTemplate) -> String {
        format!(
            "ObjectTemplate {}/{}",
            template.namespace().unwrap_or_default(),
            template.name_any()
        )
    }

    async fn patch_finalizers(
        &self,
        template: &ObjectTemplate,
        patch: serde_json::Value,
    ) -> Result<(), Error> {
        self.api(template)
            .patch(
                &template.name_any(),
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::store_write("patch", Self::describe(template), e))?;
        Ok(())
    }
}

#[async_trait]
impl TemplateClient for TemplateClientImpl {
    async fn add_finalizer(&self, template: &ObjectTemplate) -> Result<(), Error> {
        match add_finalizer_patch(template, TOFAN_FINALIZER) {
            Some(patch) => self.patch_finalizers(template, patch).await,
            None => Ok(()),
        }
    }

    async fn remove_finalizer(&self, template: &ObjectTemplate) -> Result<(), Error> {
        match remove_finalizer_patch(template, TOFAN_FINALIZER) {
            Some(patch) => self.patch_finalizers(template, patch).await,
            None => Ok(()),
        }
    }

    async fn patch_status(
        &self,
        template: &ObjectTemplate,
        status: &ObjectTemplateStatus,
    ) -> Result<(), Error> {
        let patch = status_patch(status);
        self.api(template)
            .patch_status(
                &template.name_any(),
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::store_write("patch-status", Self::describe(template), e))?;
        Ok(())
    }
}

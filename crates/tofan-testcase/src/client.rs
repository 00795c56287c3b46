//! Typed access to TestCase and ObjectTemplate records

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use tofan_common::crd::{ObjectTemplate, TestCase, TestCaseStatus};
use tofan_common::kube_utils::{add_finalizer_patch, remove_finalizer_patch};
use tofan_common::{Error, DEFAULT_FIELD_MANAGER, TOFAN_FINALIZER};

/// Trait abstracting Kubernetes client operations for TestCases
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a TestCase, `None` if it does not exist
    async fn get_test_case(&self, name: &str, namespace: &str) -> Result<Option<TestCase>, Error>;

    /// Get an ObjectTemplate, `None` if it does not exist
    async fn get_template(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ObjectTemplate>, Error>;

    /// Add the Tofan finalizer to a TestCase
    async fn add_finalizer(&self, test_case: &TestCase) -> Result<(), Error>;

    /// Remove the Tofan finalizer from a TestCase
    async fn remove_finalizer(&self, test_case: &TestCase) -> Result<(), Error>;

    /// Write a TestCase status, guarded by the resourceVersion of `test_case`
    ///
    /// Returns `Error::Conflict` when the stored object has moved on.
    async fn write_status(&self, test_case: &TestCase, status: &TestCaseStatus)
        -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
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

    fn api(&self, namespace: &str) -> Api<TestCase> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_metadata(&self, test_case: &TestCase, patch: serde_json::Value) -> Result<(), Error> {
        let namespace = test_case.namespace().unwrap_or_default();
        let name = test_case.name_any();
        self.api(&namespace)
            .patch(
                &name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::store_write("patch", format!("TestCase {}/{}", namespace, name), e))?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_test_case(&self, name: &str, namespace: &str) -> Result<Option<TestCase>, Error> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn get_template(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ObjectTemplate>, Error> {
        let api: Api<ObjectTemplate> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn add_finalizer(&self, test_case: &TestCase) -> Result<(), Error> {
        match add_finalizer_patch(test_case, TOFAN_FINALIZER) {
            Some(patch) => self.patch_metadata(test_case, patch).await,
            None => Ok(()),
        }
    }

    async fn remove_finalizer(&self, test_case: &TestCase) -> Result<(), Error> {
        match remove_finalizer_patch(test_case, TOFAN_FINALIZER) {
            Some(patch) => self.patch_metadata(test_case, patch).await,
            None => Ok(()),
        }
    }

    async fn write_status(
        &self,
        test_case: &TestCase,
        status: &TestCaseStatus,
    ) -> Result<(), Error> {
        let namespace = test_case.namespace().unwrap_or_default();
        let name = test_case.name_any();

        // A resourceVersion in a merge patch is checked by the API server as a
        // precondition, so a stale read comes back as 409.
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": test_case.resource_version()
            },
            "status": status
        });

        self.api(&namespace)
            .patch_status(
                &name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| {
                Error::store_write("patch-status", format!("TestCase {}/{}", namespace, name), e)
            })?;
        Ok(())
    }
}

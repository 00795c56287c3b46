//! Untyped access to materialized resources
//!
//! Materialized resources have whatever kind their template declares, so
//! they are handled as `DynamicObject`s addressed by an `ApiResource`.

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, PostParams, PropagationPolicy,
};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use tofan_common::Error;

/// Store operations the engine needs for materialized resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one object, `None` if it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Create an object
    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace an object wholesale; `object` must carry the current resourceVersion
    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// List objects matching a label selector
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Delete every object matching a label selector, dependents first
    async fn delete_collection(
        &self,
        resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<(), Error>;
}

/// `ResourceStore` backed by the Kubernetes API server
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

fn describe(resource: &ApiResource, namespace: &str, name: &str) -> String {
    format!("{} {}/{}", resource.kind, namespace, name)
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.api(resource, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| Error::store_write("create", describe(resource, namespace, &name), e))
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.api(resource, namespace)
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| Error::store_write("replace", describe(resource, namespace, name), e))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        let list = self
            .api(resource, namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn delete_collection(
        &self,
        resource: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<(), Error> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };
        self.api(resource, namespace)
            .delete_collection(&params, &ListParams::default().labels(label_selector))
            .await
            .map_err(|e| {
                Error::store_write(
                    "delete-collection",
                    format!("{} {} ({})", resource.plural, namespace, label_selector),
                    e,
                )
            })?;
        debug!(
            kind = %resource.kind,
            namespace = %namespace,
            selector = %label_selector,
            "Deleted resource collection"
        );
        Ok(())
    }
}

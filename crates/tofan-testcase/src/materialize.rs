//! Resource materialization
//!
//! Turns an instantiated manifest into a stored object: the kind comes from
//! the manifest itself, identity gaps are filled in, the ownership label is
//! merged in, and the object is upserted (create, or replace carrying the
//! existing resourceVersion).

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use rand::Rng;
use tracing::{debug, info};

use tofan_common::kube_utils::{build_api_resource, manifest_type};
use tofan_common::yaml::decode_document;
use tofan_common::{Error, Result, TESTCASE_NAME_LABEL};

use crate::instantiate::{random_suffix, NAME_SUFFIX_LEN};
use crate::store::ResourceStore;

/// Prefix for names synthesized when a manifest has none
pub const GENERATED_NAME_PREFIX: &str = "testcase-";

/// A manifest ready to be written
#[derive(Clone, Debug)]
pub struct PreparedResource {
    /// Resource addressing derived from the manifest's apiVersion/kind
    pub api_resource: ApiResource,
    /// Target namespace
    pub namespace: String,
    /// Target name
    pub name: String,
    /// The object to write
    pub object: DynamicObject,
}

/// How an upsert landed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No object existed; one was created
    Created,
    /// An object existed and was replaced
    Replaced,
}

/// Decode a manifest and fill in identity and ownership.
///
/// Fails with `Validation` when the manifest does not declare both
/// `apiVersion` and `kind`, and with `Decode` when it is not a valid object.
pub fn prepare<R: Rng + ?Sized>(
    manifest: &[u8],
    owner: &str,
    default_namespace: &str,
    rng: &mut R,
) -> Result<PreparedResource> {
    let value = decode_document(manifest, "manifest")?;
    let (api_version, kind) = manifest_type(&value).ok_or_else(|| {
        Error::validation_for(owner, "manifest must declare apiVersion and kind")
    })?;
    let api_resource = build_api_resource(&api_version, &kind);

    let mut object: DynamicObject =
        serde_json::from_value(value).map_err(|e| Error::decode("manifest", e.to_string()))?;

    let namespace = match object.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => ns.to_string(),
        _ => default_namespace.to_string(),
    };
    let name = match object.metadata.name.as_deref() {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => format!("{}{}", GENERATED_NAME_PREFIX, random_suffix(rng, NAME_SUFFIX_LEN)),
    };
    object.metadata.namespace = Some(namespace.clone());
    object.metadata.name = Some(name.clone());
    object
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(TESTCASE_NAME_LABEL.to_string(), owner.to_string());

    Ok(PreparedResource {
        api_resource,
        namespace,
        name,
        object,
    })
}

/// Write a prepared resource.
///
/// Not found on lookup means create. Found means copy the stored
/// resourceVersion and replace wholesale. Any other lookup error aborts
/// without writing.
pub async fn upsert(store: &dyn ResourceStore, prepared: PreparedResource) -> Result<UpsertOutcome> {
    let PreparedResource {
        api_resource,
        namespace,
        name,
        mut object,
    } = prepared;

    match store.get(&api_resource, &namespace, &name).await? {
        None => {
            store.create(&api_resource, &namespace, &object).await?;
            info!(kind = %api_resource.kind, namespace = %namespace, name = %name, "Created resource");
            Ok(UpsertOutcome::Created)
        }
        Some(existing) => {
            object.metadata.resource_version = existing.metadata.resource_version;
            store
                .replace(&api_resource, &namespace, &name, &object)
                .await?;
            debug!(kind = %api_resource.kind, namespace = %namespace, name = %name, "Replaced resource");
            Ok(UpsertOutcome::Replaced)
        }
    }
}

/// Prepare and upsert one manifest on behalf of the TestCase `owner`
pub async fn apply<R: Rng + Send + ?Sized>(
    store: &dyn ResourceStore,
    manifest: &[u8],
    owner: &str,
    default_namespace: &str,
    rng: &mut R,
) -> Result<UpsertOutcome> {
    let prepared = prepare(manifest, owner, default_namespace, rng)?;
    upsert(store, prepared).await
}

//! CRD installation utilities
//!
//! The operator installs its own CRDs on startup using server-side apply so
//! the served schema always matches the binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use tofan_common::crd::{ObjectTemplate, TestCase};

/// CRD definition with name and resource
pub struct CrdDef {
    /// `<plural>.<group>`
    pub name: &'static str,
    /// Generated definition
    pub crd: CustomResourceDefinition,
}

/// Every CRD the operator serves
pub fn tofan_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "objecttemplates.tofan.io",
            crd: ObjectTemplate::crd(),
        },
        CrdDef {
            name: "testcases.tofan.io",
            crd: TestCase::crd(),
        },
    ]
}

/// Render every CRD as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let docs = tofan_crds()
        .iter()
        .map(|def| {
            serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}

/// Install every CRD using server-side apply
pub async fn ensure_crds(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    for def in tofan_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("Tofan CRDs installed/updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tofan_common::TOFAN_GROUP;

    #[test]
    fn names_match_generated_definitions() {
        for def in tofan_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
            assert_eq!(def.crd.spec.group, TOFAN_GROUP);
        }
    }

    #[test]
    fn manifests_contain_both_kinds() {
        let yaml = crd_manifests().unwrap();
        assert!(yaml.contains("kind: ObjectTemplate"));
        assert!(yaml.contains("kind: TestCase"));
        assert!(yaml.contains("v1alpha2"));
        assert_eq!(yaml.matches("---\n").count(), 1);
    }
}

//! ObjectTemplate controller implementation

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use tofan_common::crd::{
    conditions, set_condition, Condition, ConditionStatus, ObjectTemplate, ObjectTemplateStatus,
    TemplateGvk,
};
use tofan_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use tofan_common::kube_utils::{has_finalizer, join_api_version};
use tofan_common::{EngineConfig, Error, TOFAN_FINALIZER};

use crate::client::{TemplateClient, TemplateClientImpl};

/// Name reported as the Event source
pub const CONTROLLER_NAME: &str = "tofan-objecttemplate-controller";

/// Ready message for a synced template
pub const SYNCED_MESSAGE: &str = "ObjectTemplate synced successfully";

/// Ready message for a template without apiVersion or kind
pub const INVALID_MESSAGE: &str = "template must declare apiVersion and kind";

/// Controller context for ObjectTemplates
pub struct Context {
    /// ObjectTemplate access
    pub kube: Arc<dyn TemplateClient>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Engine tunables
    pub config: EngineConfig,
}

impl Context {
    /// Create a context wired to a real cluster
    pub fn new(client: Client, config: EngineConfig) -> Self {
        let kube = TemplateClientImpl::new(client.clone()).with_field_manager(&config.field_manager);
        Self {
            kube: Arc::new(kube),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            config,
        }
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn TemplateClient>, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            kube,
            events,
            config: EngineConfig::default(),
        }
    }
}

/// Reconcile an ObjectTemplate
///
/// Records the template's group/version/kind in status with a `Ready`
/// condition. A template that declares no kind is marked not ready and left
/// until its spec changes.
#[instrument(skip(template, ctx), fields(template = %template.name_any()))]
pub async fn reconcile(template: Arc<ObjectTemplate>, ctx: Arc<Context>) -> Result<Action, Error> {
    if template.metadata.deletion_timestamp.is_some() {
        if has_finalizer(template.as_ref(), TOFAN_FINALIZER) {
            ctx.kube.remove_finalizer(&template).await?;
            info!("Removed finalizer");
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(template.as_ref(), TOFAN_FINALIZER) {
        ctx.kube.add_finalizer(&template).await?;
        debug!("Added finalizer");
    }

    let current = template.status.clone().unwrap_or_default();
    let Some(gvk) = TemplateGvk::from_template(&template.spec.template) else {
        warn!("Template declares no apiVersion or kind");
        let status = invalid_status(current.clone());
        if status != current {
            ctx.kube.patch_status(&template, &status).await?;
            publish(
                &template,
                &ctx,
                EventType::Warning,
                reasons::INVALID_TEMPLATE,
                Some(INVALID_MESSAGE.to_string()),
            )
            .await;
        }
        return Ok(Action::await_change());
    };

    let status = synced_status(current.clone(), &gvk);
    if status != current {
        ctx.kube.patch_status(&template, &status).await?;
        info!(group = %gvk.group, version = %gvk.version, kind = %gvk.kind, "ObjectTemplate synced");
        publish(
            &template,
            &ctx,
            EventType::Normal,
            reasons::TEMPLATE_SYNCED,
            Some(format!(
                "{} {}",
                join_api_version(&gvk.group, &gvk.version),
                gvk.kind
            )),
        )
        .await;
    }
    Ok(Action::requeue(ctx.config.requeue_interval))
}

/// Error policy for the ObjectTemplate controller
pub fn error_policy(template: Arc<ObjectTemplate>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        template = %template.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue_interval)
}

fn synced_status(mut status: ObjectTemplateStatus, gvk: &TemplateGvk) -> ObjectTemplateStatus {
    status.group = Some(gvk.group.clone());
    status.version = Some(gvk.version.clone());
    status.kind = Some(gvk.kind.clone());
    set_condition(
        &mut status.conditions,
        Condition::new(
            conditions::READY,
            ConditionStatus::True,
            reasons::TEMPLATE_SYNCED,
            SYNCED_MESSAGE,
        ),
    );
    status
}

fn invalid_status(mut status: ObjectTemplateStatus) -> ObjectTemplateStatus {
    status.group = None;
    status.version = None;
    status.kind = None;
    set_condition(
        &mut status.conditions,
        Condition::new(
            conditions::READY,
            ConditionStatus::False,
            reasons::INVALID_TEMPLATE,
            INVALID_MESSAGE,
        ),
    );
    status
}

async fn publish(
    template: &ObjectTemplate,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&template.object_ref(&()), type_, reason, actions::RECONCILE, note)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockTemplateClient;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tofan_common::crd::{find_condition, ObjectTemplateSpec};
    use tofan_common::events::NoopEventPublisher;

    fn template(doc: serde_json::Value) -> ObjectTemplate {
        let mut t = ObjectTemplate::new(
            "web",
            ObjectTemplateSpec {
                name_prefix: None,
                template: doc,
            },
        );
        t.metadata.namespace = Some("perf".to_string());
        t.metadata.finalizers = Some(vec![TOFAN_FINALIZER.to_string()]);
        t
    }

    fn capturing(kube: &mut MockTemplateClient) -> Arc<Mutex<Vec<ObjectTemplateStatus>>> {
        let written = Arc::new(Mutex::new(Vec::new()));
        let w = written.clone();
        kube.expect_patch_status().returning(move |_, status| {
            w.lock().unwrap().push(status.clone());
            Ok(())
        });
        written
    }

    fn context(kube: MockTemplateClient) -> Arc<Context> {
        Arc::new(Context::for_testing(Arc::new(kube), Arc::new(NoopEventPublisher)))
    }

    #[tokio::test]
    async fn apps_template_records_gvk() {
        let mut kube = MockTemplateClient::new();
        let written = capturing(&mut kube);

        let action = reconcile(
            Arc::new(template(json!({"apiVersion": "apps/v1", "kind": "Deployment"}))),
            context(kube),
        )
        .await
        .unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(180)));
        let written = written.lock().unwrap();
        let status = written.last().unwrap();
        assert_eq!(status.group.as_deref(), Some("apps"));
        assert_eq!(status.version.as_deref(), Some("v1"));
        assert_eq!(status.kind.as_deref(), Some("Deployment"));
        let ready = find_condition(&status.conditions, conditions::READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert_eq!(ready.reason, "ObjectTemplateSyncSuccess");
        assert_eq!(ready.message, "ObjectTemplate synced successfully");
    }

    #[tokio::test]
    async fn core_kind_has_empty_group() {
        let mut kube = MockTemplateClient::new();
        let written = capturing(&mut kube);

        reconcile(
            Arc::new(template(json!({"apiVersion": "v1", "kind": "ConfigMap"}))),
            context(kube),
        )
        .await
        .unwrap();

        assert_eq!(written.lock().unwrap()[0].group.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn unchanged_status_is_not_rewritten() {
        let mut t = template(json!({"apiVersion": "apps/v1", "kind": "Deployment"}));
        t.status = Some(synced_status(
            ObjectTemplateStatus::default(),
            &TemplateGvk {
                group: "apps".to_string(),
                version: "v1".to_string(),
                kind: "Deployment".to_string(),
            },
        ));
        let mut kube = MockTemplateClient::new();
        kube.expect_patch_status().never();

        reconcile(Arc::new(t), context(kube)).await.unwrap();
    }

    #[tokio::test]
    async fn kindless_template_is_marked_invalid() {
        let mut kube = MockTemplateClient::new();
        let written = capturing(&mut kube);

        let action = reconcile(Arc::new(template(json!({"data": {"k": "v"}}))), context(kube))
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        let written = written.lock().unwrap();
        let status = written.last().unwrap();
        assert!(status.kind.is_none());
        let ready = find_condition(&status.conditions, conditions::READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "InvalidTemplate");
    }

    #[tokio::test]
    async fn losing_kind_clears_recorded_gvk() {
        let mut t = template(json!({"data": {"k": "v"}}));
        t.status = Some(synced_status(
            ObjectTemplateStatus::default(),
            &TemplateGvk {
                group: "apps".to_string(),
                version: "v1".to_string(),
                kind: "Deployment".to_string(),
            },
        ));
        let mut kube = MockTemplateClient::new();
        let written = capturing(&mut kube);

        reconcile(Arc::new(t), context(kube)).await.unwrap();

        let written = written.lock().unwrap();
        let status = written.last().unwrap();
        assert!(status.group.is_none());
        assert!(status.version.is_none());
        assert!(status.kind.is_none());
        let ready = find_condition(&status.conditions, conditions::READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
    }

    #[tokio::test]
    async fn new_template_gets_finalizer() {
        let mut t = template(json!({"apiVersion": "v1", "kind": "Service"}));
        t.metadata.finalizers = None;
        let mut kube = MockTemplateClient::new();
        kube.expect_add_finalizer().times(1).returning(|_| Ok(()));
        capturing(&mut kube);

        reconcile(Arc::new(t), context(kube)).await.unwrap();
    }

    #[tokio::test]
    async fn deletion_releases_finalizer() {
        let mut t = template(json!({"apiVersion": "v1", "kind": "Service"}));
        t.metadata.deletion_timestamp = Some(Time(Utc::now()));
        let mut kube = MockTemplateClient::new();
        kube.expect_remove_finalizer().times(1).returning(|_| Ok(()));
        kube.expect_patch_status().never();

        let action = reconcile(Arc::new(t), context(kube)).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[test]
    fn error_policy_requeues() {
        let ctx = context(MockTemplateClient::new());
        let t = Arc::new(template(json!({})));
        assert_eq!(
            error_policy(t, &Error::internal("boom"), ctx),
            Action::requeue(Duration::from_secs(30))
        );
    }
}

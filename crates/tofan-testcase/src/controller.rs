//! TestCase controller implementation
//!
//! Drives each TestCase through `unset -> Pending -> InProgress ->
//! {Completed | Error}`. All coordination state (phase, finalizer, ownership
//! labels) lives on the stored objects, so every step is safe to re-drive
//! after a crash.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tofan_common::crd::{
    conditions, find_condition, ConditionStatus, ObjectTemplate, TestCase, TestCasePhase,
};
use tofan_common::events::{actions, reasons, EventPublisher, KubeEventPublisher, NoopEventPublisher};
use tofan_common::kube_utils::{has_finalizer, namespaced_name};
use tofan_common::retry::retry_with_backoff;
use tofan_common::{EngineConfig, Error, TOFAN_FINALIZER};

use crate::client::{KubeClient, KubeClientImpl};
use crate::instantiate::{instance_rng, instantiate};
use crate::materialize;
use crate::readiness::{ReadinessWatcher, WatcherRegistry};
use crate::status::{phase_change, update_status, StatusChange};
use crate::store::{KubeResourceStore, ResourceStore};
use crate::teardown::{resource_namespace, teardown};

/// Name reported as the Event source
pub const CONTROLLER_NAME: &str = "tofan-testcase-controller";

/// Controller context shared by every reconcile and every readiness poller
pub struct Context {
    /// TestCase and ObjectTemplate access
    pub kube: Arc<dyn KubeClient>,
    /// Materialized resource access
    pub store: Arc<dyn ResourceStore>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Engine tunables
    pub config: EngineConfig,
    /// Live readiness pollers
    pub watchers: Arc<WatcherRegistry>,
}

impl Context {
    /// Create a builder over explicit store clients
    pub fn builder(kube: Arc<dyn KubeClient>, store: Arc<dyn ResourceStore>) -> ContextBuilder {
        ContextBuilder::new(kube, store)
    }

    /// Create a builder wired to a real cluster
    pub fn for_client(client: Client, config: EngineConfig) -> ContextBuilder {
        let kube = KubeClientImpl::new(client.clone()).with_field_manager(&config.field_manager);
        Self::builder(Arc::new(kube), Arc::new(KubeResourceStore::new(client.clone())))
            .events(Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)))
            .config(config)
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```text
/// let ctx = Context::for_client(client, config)
///     .shutdown_token(token)
///     .build();
/// ```
pub struct ContextBuilder {
    kube: Arc<dyn KubeClient>,
    store: Arc<dyn ResourceStore>,
    events: Option<Arc<dyn EventPublisher>>,
    config: Option<EngineConfig>,
    shutdown: Option<CancellationToken>,
}

impl ContextBuilder {
    fn new(kube: Arc<dyn KubeClient>, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            kube,
            store,
            events: None,
            config: None,
            shutdown: None,
        }
    }

    /// Set the event publisher (defaults to a no-op publisher)
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Token whose cancellation stops every readiness poller
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self.kube,
            store: self.store,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            config: self.config.unwrap_or_default(),
            watchers: Arc::new(WatcherRegistry::new(self.shutdown.unwrap_or_default())),
        }
    }
}

/// Reconcile a TestCase
#[instrument(skip(test_case, ctx), fields(test_case = %test_case.name_any()))]
pub async fn reconcile(test_case: Arc<TestCase>, ctx: Arc<Context>) -> Result<Action, Error> {
    if test_case.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&test_case, &ctx).await;
    }

    if !has_finalizer(test_case.as_ref(), TOFAN_FINALIZER) {
        ctx.kube.add_finalizer(&test_case).await?;
        debug!("Added finalizer");
    }

    match test_case.phase() {
        None | Some(TestCasePhase::Pending) => reconcile_pending(&test_case, &ctx).await,
        Some(TestCasePhase::InProgress) => {
            let template = fetch_template(&test_case, &ctx).await?;
            run_pass(&test_case, &template, &ctx).await
        }
        Some(TestCasePhase::Completed) => reconcile_completed(&test_case, &ctx).await,
        Some(TestCasePhase::Error) => Ok(Action::await_change()),
    }
}

/// Error policy for the TestCase controller
pub fn error_policy(test_case: Arc<TestCase>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        test_case = %test_case.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue_interval)
}

async fn reconcile_pending(test_case: &TestCase, ctx: &Context) -> Result<Action, Error> {
    if test_case.phase().is_none() {
        transition(test_case, ctx, &phase_change(TestCasePhase::Pending)).await?;
        publish(
            test_case,
            ctx,
            EventType::Normal,
            reasons::AWAITING_EXECUTION,
            actions::RECONCILE,
            None,
        )
        .await;
    }

    let template = match fetch_template(test_case, ctx).await {
        Ok(template) => template,
        Err(e) => {
            warn!(error = %e, "ObjectTemplate unavailable, staying Pending");
            let change = phase_change(TestCasePhase::Pending).condition(
                conditions::FAILED,
                ConditionStatus::True,
                conditions::REASON_TEMPLATE_NOT_FOUND,
                e.to_string(),
            );
            transition(test_case, ctx, &change).await?;
            publish(
                test_case,
                ctx,
                EventType::Warning,
                reasons::TEMPLATE_NOT_FOUND,
                actions::RECONCILE,
                Some(e.to_string()),
            )
            .await;
            return Ok(Action::requeue(ctx.config.requeue_interval));
        }
    };

    let mut change = phase_change(TestCasePhase::InProgress);
    let failed_before = test_case
        .status
        .as_ref()
        .and_then(|s| find_condition(&s.conditions, conditions::FAILED))
        .is_some();
    if failed_before {
        change = change.condition(
            conditions::FAILED,
            ConditionStatus::False,
            conditions::REASON_EXECUTION_STARTED,
            conditions::MESSAGE_IN_PROGRESS,
        );
    }
    if !transition(test_case, ctx, &change).await? {
        return Ok(Action::requeue(ctx.config.requeue_interval));
    }
    info!(template = %template.name_any(), "Execution started");
    publish(
        test_case,
        ctx,
        EventType::Normal,
        reasons::EXECUTION_STARTED,
        actions::RECONCILE,
        None,
    )
    .await;

    run_pass(test_case, &template, ctx).await
}

/// Instantiate and materialize every (path, value) override.
///
/// Decode, path and manifest validation failures skip that override. The
/// first store failure ends the pass in `Error`.
async fn run_pass(
    test_case: &TestCase,
    template: &ObjectTemplate,
    ctx: &Context,
) -> Result<Action, Error> {
    let name = test_case.name_any();
    let template_bytes = serde_json::to_vec(&template.spec.template)
        .map_err(|e| Error::decode("template", e.to_string()))?;
    let uid = test_case.uid().unwrap_or_else(|| namespaced_name(test_case));
    let namespace = resource_namespace(test_case, &ctx.config.default_namespace);

    let mut materialized = 0u32;
    let mut skipped = 0u32;

    for (index, field) in test_case.spec.dynamic_fields.iter().enumerate() {
        for (key, value) in &field.values {
            let mut rng = instance_rng(&uid, index, &field.path, key);
            let outcome = match serde_json::to_vec(value)
                .map_err(|e| Error::decode("value", e.to_string()))
                .and_then(|v| instantiate(&template_bytes, &field.path, &v, &mut rng))
            {
                Ok(manifest) => {
                    materialize::apply(
                        ctx.store.as_ref(),
                        &manifest,
                        &name,
                        &namespace,
                        &mut rng,
                    )
                    .await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(_) => materialized += 1,
                Err(e) if is_skippable(&e) => {
                    skipped += 1;
                    warn!(path = %field.path, key = %key, error = %e, "Skipping override");
                    publish(
                        test_case,
                        ctx,
                        EventType::Warning,
                        reasons::OVERRIDE_SKIPPED,
                        actions::MATERIALIZE,
                        Some(format!("{}[{}]: {}", field.path, key, e)),
                    )
                    .await;
                }
                Err(e) => {
                    error!(path = %field.path, key = %key, error = %e, "Materialization failed");
                    let change = phase_change(TestCasePhase::Error).counts(materialized, skipped);
                    transition(test_case, ctx, &change).await?;
                    publish(
                        test_case,
                        ctx,
                        EventType::Warning,
                        reasons::EXECUTION_FAILED,
                        actions::MATERIALIZE,
                        Some(e.to_string()),
                    )
                    .await;
                    return Ok(Action::await_change());
                }
            }
        }
    }

    let change = phase_change(TestCasePhase::Completed)
        .counts(materialized, skipped)
        .resources_ready(false);
    if !transition(test_case, ctx, &change).await? {
        return Ok(Action::requeue(ctx.config.requeue_interval));
    }
    info!(materialized, skipped, "Execution successful");
    publish(
        test_case,
        ctx,
        EventType::Normal,
        reasons::EXECUTION_SUCCESSFUL,
        actions::MATERIALIZE,
        Some(format!(
            "Materialized {} resources, skipped {} overrides",
            materialized, skipped
        )),
    )
    .await;

    start_poller(test_case, template.clone(), ctx);
    Ok(Action::requeue(ctx.config.requeue_interval))
}

/// Restart a readiness poller lost to a restart
async fn reconcile_completed(test_case: &TestCase, ctx: &Context) -> Result<Action, Error> {
    if test_case.resources_ready() {
        return Ok(Action::await_change());
    }
    if !ctx.watchers.is_running(&namespaced_name(test_case)) {
        match fetch_template(test_case, ctx).await {
            Ok(template) => {
                start_poller(test_case, template, ctx);
            }
            Err(e) => warn!(error = %e, "Cannot resume readiness polling"),
        }
    }
    Ok(Action::requeue(ctx.config.requeue_interval))
}

async fn handle_deletion(test_case: &TestCase, ctx: &Context) -> Result<Action, Error> {
    if !has_finalizer(test_case, TOFAN_FINALIZER) {
        return Ok(Action::await_change());
    }

    ctx.watchers.cancel(&namespaced_name(test_case));

    if matches!(
        test_case.phase(),
        Some(TestCasePhase::InProgress | TestCasePhase::Completed | TestCasePhase::Error)
    ) {
        teardown_on_delete(test_case, ctx).await;
    }

    ctx.kube.remove_finalizer(test_case).await?;
    info!("Removed finalizer");
    Ok(Action::await_change())
}

/// Best-effort teardown: retried with backoff, reported, never fatal
async fn teardown_on_delete(test_case: &TestCase, ctx: &Context) {
    let result = match fetch_template(test_case, ctx).await {
        Ok(template) => {
            let store = ctx.store.as_ref();
            let template = &template;
            let fallback = ctx.config.default_namespace.as_str();
            retry_with_backoff(&ctx.config.teardown_retry, "teardown", move || async move {
                teardown(store, test_case, template, fallback).await
            })
            .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            publish(
                test_case,
                ctx,
                EventType::Normal,
                reasons::TEARDOWN_COMPLETE,
                actions::TEARDOWN,
                None,
            )
            .await;
        }
        Err(e) => {
            warn!(error = %e, "Teardown failed, removing finalizer anyway");
            publish(
                test_case,
                ctx,
                EventType::Warning,
                reasons::TEARDOWN_FAILED,
                actions::TEARDOWN,
                Some(e.to_string()),
            )
            .await;
        }
    }
}

fn start_poller(test_case: &TestCase, template: ObjectTemplate, ctx: &Context) -> bool {
    let watcher = match ReadinessWatcher::new(
        ctx.kube.clone(),
        ctx.store.clone(),
        ctx.events.clone(),
        ctx.config.clone(),
        test_case.clone(),
        template,
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "Cannot poll readiness");
            return false;
        }
    };
    ctx.watchers
        .start(namespaced_name(test_case), move |token| watcher.run(token))
}

async fn fetch_template(test_case: &TestCase, ctx: &Context) -> Result<ObjectTemplate, Error> {
    let namespace = test_case.namespace().unwrap_or_default();
    let name = &test_case.spec.object_template_ref.name;
    ctx.kube
        .get_template(name, &namespace)
        .await?
        .ok_or_else(|| Error::not_found("ObjectTemplate", format!("{}/{}", namespace, name)))
}

async fn transition(
    test_case: &TestCase,
    ctx: &Context,
    change: &StatusChange,
) -> Result<bool, Error> {
    update_status(
        ctx.kube.as_ref(),
        &ctx.config.status_retry,
        &test_case.name_any(),
        &test_case.namespace().unwrap_or_default(),
        change,
    )
    .await
}

async fn publish(
    test_case: &TestCase,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&test_case.object_ref(&()), type_, reason, action, note)
        .await;
}

fn is_skippable(error: &Error) -> bool {
    matches!(
        error,
        Error::Decode { .. } | Error::PathNotFound { .. } | Error::Validation { .. }
    )
}

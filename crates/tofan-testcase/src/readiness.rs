//! Readiness polling
//!
//! After a TestCase completes its instantiation pass, one poller per TestCase
//! lists the materialized resources on a fixed interval. Once every listed
//! resource reports a condition with status `"True"`, the poller records
//! readiness on the TestCase, tears the resources down, and exits.
//!
//! Pollers run outside the reconcile loop. The `WatcherRegistry` keeps at most
//! one alive per TestCase and hands each a child of the engine's root
//! cancellation token.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tofan_common::crd::{conditions, ConditionStatus, ObjectTemplate, TestCase, TestCasePhase};
use tofan_common::events::{actions, reasons, EventPublisher};
use tofan_common::{owner_label_selector, EngineConfig, Result};

use crate::client::KubeClient;
use crate::status::{update_status, StatusChange};
use crate::store::ResourceStore;
use crate::teardown::{resource_namespace, teardown, template_api_resource};

/// Whether a resource reports any status condition with status `"True"`
pub fn is_resource_ready(object: &DynamicObject) -> bool {
    object
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.get("status").and_then(Value::as_str) == Some("True"))
        })
}

/// Aggregate readiness of one poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Resources listed
    pub total: usize,
    /// Resources reporting ready
    pub ready: usize,
}

impl ReadinessReport {
    /// True when every listed resource is ready, including when none were listed
    pub fn all_ready(&self) -> bool {
        self.ready == self.total
    }
}

/// List the resources carrying `label_selector` and count the ready ones
pub async fn check_readiness(
    store: &dyn ResourceStore,
    resource: &ApiResource,
    namespace: &str,
    label_selector: &str,
) -> Result<ReadinessReport> {
    let objects = store.list(resource, namespace, label_selector).await?;
    Ok(ReadinessReport {
        total: objects.len(),
        ready: objects.iter().filter(|o| is_resource_ready(o)).count(),
    })
}

/// How a poller ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Readiness recorded and teardown attempted
    Completed,
    /// The cancellation token fired
    Cancelled,
    /// The TestCase had moved to a phase readiness may not overwrite
    Superseded,
    /// Readiness was observed but could not be recorded
    StatusUpdateFailed,
}

/// Poller for one TestCase
pub struct ReadinessWatcher {
    kube: Arc<dyn KubeClient>,
    store: Arc<dyn ResourceStore>,
    events: Arc<dyn EventPublisher>,
    config: EngineConfig,
    test_case: TestCase,
    template: ObjectTemplate,
    api_resource: ApiResource,
}

impl ReadinessWatcher {
    /// Create a poller; fails when the template's kind cannot be determined
    pub fn new(
        kube: Arc<dyn KubeClient>,
        store: Arc<dyn ResourceStore>,
        events: Arc<dyn EventPublisher>,
        config: EngineConfig,
        test_case: TestCase,
        template: ObjectTemplate,
    ) -> Result<Self> {
        let api_resource = template_api_resource(&template)?;
        Ok(Self {
            kube,
            store,
            events,
            config,
            test_case,
            template,
            api_resource,
        })
    }

    /// Poll until every resource is ready or `cancel` fires.
    ///
    /// List failures are logged and retried on the next tick. Cancellation
    /// is honoured at every await and causes no further writes.
    pub async fn run(self, cancel: CancellationToken) -> WatchOutcome {
        let name = self.test_case.name_any();
        let namespace = self.test_case.namespace().unwrap_or_default();
        let resources_namespace =
            resource_namespace(&self.test_case, &self.config.default_namespace);
        let selector = owner_label_selector(&name);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(test_case = %name, "Readiness poller cancelled");
                    return WatchOutcome::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WatchOutcome::Cancelled,
                r = check_readiness(
                    self.store.as_ref(),
                    &self.api_resource,
                    &resources_namespace,
                    &selector,
                ) => r,
            };

            let report = match checked {
                Ok(report) => report,
                Err(e) => {
                    warn!(test_case = %name, error = %e, "Readiness poll failed, will retry");
                    continue;
                }
            };

            if !report.all_ready() {
                debug!(
                    test_case = %name,
                    ready = report.ready,
                    total = report.total,
                    "Resources not ready yet"
                );
                continue;
            }

            if cancel.is_cancelled() {
                return WatchOutcome::Cancelled;
            }
            return self.finish(&name, &namespace, report).await;
        }
    }

    async fn finish(&self, name: &str, namespace: &str, report: ReadinessReport) -> WatchOutcome {
        let message = format!("{} of {} resources ready", report.ready, report.total);
        let change = StatusChange::to(TestCasePhase::Completed)
            .condition(
                conditions::READY,
                ConditionStatus::True,
                conditions::REASON_RESOURCES_READY,
                message.clone(),
            )
            .resources_ready(true);

        match update_status(
            self.kube.as_ref(),
            &self.config.status_retry,
            name,
            namespace,
            &change,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(test_case = %name, "TestCase moved on before readiness was recorded");
                return WatchOutcome::Superseded;
            }
            Err(e) => {
                warn!(test_case = %name, error = %e, "Failed to record resource readiness");
                return WatchOutcome::StatusUpdateFailed;
            }
        }

        let obj_ref = self.test_case.object_ref(&());
        info!(test_case = %name, total = report.total, "All resources ready");
        self.events
            .publish(
                &obj_ref,
                EventType::Normal,
                reasons::RESOURCES_READY,
                actions::POLL,
                Some(message),
            )
            .await;

        match teardown(
            self.store.as_ref(),
            &self.test_case,
            &self.template,
            &self.config.default_namespace,
        )
        .await
        {
            Ok(()) => {
                self.events
                    .publish(
                        &obj_ref,
                        EventType::Normal,
                        reasons::TEARDOWN_COMPLETE,
                        actions::TEARDOWN,
                        None,
                    )
                    .await;
            }
            Err(e) => {
                warn!(test_case = %name, error = %e, "Teardown after readiness failed");
                self.events
                    .publish(
                        &obj_ref,
                        EventType::Warning,
                        reasons::TEARDOWN_FAILED,
                        actions::TEARDOWN,
                        Some(e.to_string()),
                    )
                    .await;
            }
        }
        WatchOutcome::Completed
    }
}

struct ActiveWatcher {
    generation: u64,
    token: CancellationToken,
}

/// Registry of running readiness pollers, keyed by `namespace/name`
pub struct WatcherRegistry {
    root: CancellationToken,
    active: DashMap<String, ActiveWatcher>,
    generation: AtomicU64,
}

impl WatcherRegistry {
    /// Create a registry whose pollers all stop when `root` is cancelled
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            active: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Spawn the poller produced by `run` unless one is already alive for `key`.
    ///
    /// Returns whether a poller was started. The entry is released when the
    /// poller's future finishes.
    pub fn start<F, Fut>(self: &Arc<Self>, key: String, run: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = WatchOutcome> + Send + 'static,
    {
        if self.root.is_cancelled() {
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        match self.active.entry(key.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(ActiveWatcher {
                    generation,
                    token: token.clone(),
                });
            }
        }

        debug!(key = %key, "Starting readiness poller");
        let poll = run(token);
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = poll.await;
            registry
                .active
                .remove_if(&key, |_, w| w.generation == generation);
            debug!(key = %key, outcome = ?outcome, "Readiness poller exited");
        });
        true
    }

    /// Whether a poller is alive for `key`
    pub fn is_running(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    /// Cancel the poller for `key`. Returns false if none was running.
    pub fn cancel(&self, key: &str) -> bool {
        match self.active.remove(key) {
            Some((_, watcher)) => {
                info!(key = %key, "Cancelling readiness poller");
                watcher.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of live pollers
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no poller is alive
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Cancel every poller and refuse new ones
    pub fn shutdown(&self) {
        let count = self.active.len();
        if count > 0 {
            info!(count = count, "Cancelling all readiness pollers");
        }
        self.root.cancel();
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use crate::store::MockResourceStore;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use tofan_common::crd::{ObjectTemplateSpec, TestCaseSpec, TestCaseStatus};
    use tofan_common::events::NoopEventPublisher;
    use tofan_common::kube_utils::build_api_resource;
    use tofan_common::Error;
    use tokio::sync::oneshot;

    fn deployments() -> ApiResource {
        build_api_resource("apps/v1", "Deployment")
    }

    fn resource(name: &str, statuses: &[&str]) -> DynamicObject {
        let conditions: Vec<Value> = statuses
            .iter()
            .map(|s| json!({"type": "Available", "status": s}))
            .collect();
        DynamicObject::new(name, &deployments())
            .data(json!({"status": {"conditions": conditions}}))
    }

    fn test_case(phase: TestCasePhase) -> TestCase {
        let mut tc = TestCase::new("load", TestCaseSpec::default());
        tc.metadata.namespace = Some("perf".to_string());
        tc.metadata.resource_version = Some("3".to_string());
        tc.status = Some(TestCaseStatus {
            phase: Some(phase),
            ..Default::default()
        });
        tc
    }

    fn template() -> ObjectTemplate {
        ObjectTemplate::new(
            "web",
            ObjectTemplateSpec {
                name_prefix: None,
                template: json!({"apiVersion": "apps/v1", "kind": "Deployment"}),
            },
        )
    }

    fn watcher(kube: MockKubeClient, store: MockResourceStore) -> ReadinessWatcher {
        ReadinessWatcher::new(
            Arc::new(kube),
            Arc::new(store),
            Arc::new(NoopEventPublisher),
            EngineConfig::for_testing(),
            test_case(TestCasePhase::Completed),
            template(),
        )
        .unwrap()
    }

    mod readiness_checks {
        use super::*;

        #[test]
        fn any_true_condition_counts() {
            assert!(is_resource_ready(&resource("a", &["False", "True"])));
            assert!(!is_resource_ready(&resource("b", &["False", "Unknown"])));
        }

        #[test]
        fn missing_or_malformed_conditions_are_not_ready() {
            let bare = DynamicObject::new("c", &deployments());
            assert!(!is_resource_ready(&bare));
            let odd = DynamicObject::new("d", &deployments())
                .data(json!({"status": {"conditions": "True"}}));
            assert!(!is_resource_ready(&odd));
            let boolean = DynamicObject::new("e", &deployments())
                .data(json!({"status": {"conditions": [{"status": true}]}}));
            assert!(!is_resource_ready(&boolean));
        }

        #[tokio::test]
        async fn aggregate_requires_every_resource() {
            let round = Arc::new(AtomicU32::new(0));
            let r = round.clone();
            let mut store = MockResourceStore::new();
            store
                .expect_list()
                .withf(|_, ns, selector| ns == "perf" && selector == "tofan.io/testcase-name=load")
                .returning(move |_, _, _| {
                    if r.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(vec![resource("a", &["False"]), resource("b", &["True"])])
                    } else {
                        Ok(vec![resource("a", &["True"]), resource("b", &["True"])])
                    }
                });

            let first = check_readiness(&store, &deployments(), "perf", "tofan.io/testcase-name=load")
                .await
                .unwrap();
            assert_eq!(first, ReadinessReport { total: 2, ready: 1 });
            assert!(!first.all_ready());

            let second = check_readiness(&store, &deployments(), "perf", "tofan.io/testcase-name=load")
                .await
                .unwrap();
            assert!(second.all_ready());
        }

        #[test]
        fn empty_listing_counts_as_ready() {
            assert!(ReadinessReport { total: 0, ready: 0 }.all_ready());
        }
    }

    mod polling {
        use super::*;

        fn accepting_kube(writes: Arc<Mutex<Vec<TestCaseStatus>>>) -> MockKubeClient {
            let mut kube = MockKubeClient::new();
            kube.expect_get_test_case()
                .returning(|_, _| Ok(Some(test_case(TestCasePhase::Completed))));
            kube.expect_write_status().returning(move |_, status| {
                writes.lock().unwrap().push(status.clone());
                Ok(())
            });
            kube
        }

        #[tokio::test(start_paused = true)]
        async fn records_readiness_then_tears_down() {
            let writes = Arc::new(Mutex::new(Vec::new()));
            let mut store = MockResourceStore::new();
            store
                .expect_list()
                .returning(|_, _, _| Ok(vec![resource("a", &["True"])]));
            store
                .expect_delete_collection()
                .times(1)
                .returning(|_, _, _| Ok(()));

            let outcome = watcher(accepting_kube(writes.clone()), store)
                .run(CancellationToken::new())
                .await;

            assert_eq!(outcome, WatchOutcome::Completed);
            let writes = writes.lock().unwrap();
            assert_eq!(writes.len(), 1);
            assert_eq!(writes[0].resources_ready, Some(true));
            assert_eq!(writes[0].phase, Some(TestCasePhase::Completed));
        }

        #[tokio::test(start_paused = true)]
        async fn list_failures_are_retried() {
            let calls = Arc::new(AtomicU32::new(0));
            let c = calls.clone();
            let mut store = MockResourceStore::new();
            store.expect_list().returning(move |_, _, _| {
                match c.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(Error::internal("connection refused")),
                    1 => Ok(vec![resource("a", &["False"])]),
                    _ => Ok(vec![resource("a", &["True"])]),
                }
            });
            store
                .expect_delete_collection()
                .returning(|_, _, _| Ok(()));

            let outcome = watcher(accepting_kube(Arc::new(Mutex::new(Vec::new()))), store)
                .run(CancellationToken::new())
                .await;

            assert_eq!(outcome, WatchOutcome::Completed);
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn cancelled_poller_has_no_side_effects() {
            let mut kube = MockKubeClient::new();
            kube.expect_write_status().never();
            let mut store = MockResourceStore::new();
            store.expect_list().never();
            store.expect_delete_collection().never();

            let cancel = CancellationToken::new();
            cancel.cancel();
            let outcome = watcher(kube, store).run(cancel).await;
            assert_eq!(outcome, WatchOutcome::Cancelled);
        }

        #[tokio::test(start_paused = true)]
        async fn errored_test_case_is_not_overwritten() {
            let mut kube = MockKubeClient::new();
            kube.expect_get_test_case()
                .returning(|_, _| Ok(Some(test_case(TestCasePhase::Error))));
            kube.expect_write_status().never();
            let mut store = MockResourceStore::new();
            store
                .expect_list()
                .returning(|_, _, _| Ok(vec![resource("a", &["True"])]));
            store.expect_delete_collection().never();

            let outcome = watcher(kube, store).run(CancellationToken::new()).await;
            assert_eq!(outcome, WatchOutcome::Superseded);
        }

        #[tokio::test(start_paused = true)]
        async fn teardown_failure_still_completes() {
            let mut store = MockResourceStore::new();
            store
                .expect_list()
                .returning(|_, _, _| Ok(vec![resource("a", &["True"])]));
            store
                .expect_delete_collection()
                .returning(|_, _, _| Err(Error::internal("forbidden")));

            let outcome = watcher(accepting_kube(Arc::new(Mutex::new(Vec::new()))), store)
                .run(CancellationToken::new())
                .await;
            assert_eq!(outcome, WatchOutcome::Completed);
        }
    }

    mod registry {
        use super::*;

        #[tokio::test]
        async fn one_poller_per_key() {
            let registry = Arc::new(WatcherRegistry::new(CancellationToken::new()));
            let (release, released) = oneshot::channel::<()>();

            assert!(registry.start("perf/load".to_string(), move |_| async move {
                let _ = released.await;
                WatchOutcome::Completed
            }));
            assert!(!registry.start("perf/load".to_string(), |_| async {
                WatchOutcome::Completed
            }));
            assert!(registry.is_running("perf/load"));
            assert_eq!(registry.len(), 1);

            let _ = release.send(());
            for _ in 0..100 {
                if !registry.is_running("perf/load") {
                    break;
                }
                tokio::task::yield_now().await;
            }
            assert!(!registry.is_running("perf/load"));
        }

        #[tokio::test]
        async fn cancel_fires_the_poller_token() {
            let registry = Arc::new(WatcherRegistry::new(CancellationToken::new()));
            let (tx, rx) = oneshot::channel();

            registry.start("perf/load".to_string(), move |token| async move {
                token.cancelled().await;
                let _ = tx.send(());
                WatchOutcome::Cancelled
            });

            assert!(registry.cancel("perf/load"));
            assert!(rx.await.is_ok());
            assert!(!registry.cancel("perf/load"));
        }

        #[tokio::test]
        async fn shutdown_stops_everything_and_refuses_new_pollers() {
            let root = CancellationToken::new();
            let registry = Arc::new(WatcherRegistry::new(root.clone()));
            let (tx, rx) = oneshot::channel();

            registry.start("perf/a".to_string(), move |token| async move {
                token.cancelled().await;
                let _ = tx.send(());
                WatchOutcome::Cancelled
            });
            registry.shutdown();

            assert!(root.is_cancelled());
            assert!(rx.await.is_ok());
            assert!(registry.is_empty());
            assert!(!registry.start("perf/b".to_string(), |_| async {
                WatchOutcome::Completed
            }));
        }
    }
}

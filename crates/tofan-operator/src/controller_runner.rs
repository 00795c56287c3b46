//! Controller runner - builds controller futures for each Tofan CRD
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! joins. Construction stays free of I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use tofan_common::crd::{ObjectTemplate, TestCase};
use tofan_common::EngineConfig;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client times out.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller future ready to be joined
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the ObjectTemplate controller future
pub fn build_template_controllers(client: Client, config: EngineConfig) -> Vec<ControllerFuture> {
    let ctx = Arc::new(tofan_object_template::Context::new(client.clone(), config));
    let templates: Api<ObjectTemplate> = Api::all(client);

    tracing::info!("- ObjectTemplate controller");

    vec![Box::pin(
        Controller::new(
            templates,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(
            tofan_object_template::reconcile,
            tofan_object_template::error_policy,
            ctx,
        )
        .for_each(log_reconcile_result("ObjectTemplate")),
    )]
}

/// Build the TestCase controller future
///
/// Cancelling `shutdown` stops every readiness poller the controller started.
pub fn build_test_case_controllers(
    client: Client,
    config: EngineConfig,
    shutdown: CancellationToken,
) -> Vec<ControllerFuture> {
    let ctx = Arc::new(
        tofan_testcase::Context::for_client(client.clone(), config)
            .shutdown_token(shutdown)
            .build(),
    );
    let test_cases: Api<TestCase> = Api::all(client);

    tracing::info!("- TestCase controller");

    vec![Box::pin(
        Controller::new(
            test_cases,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(tofan_testcase::reconcile, tofan_testcase::error_policy, ctx)
        .for_each(log_reconcile_result("TestCase")),
    )]
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

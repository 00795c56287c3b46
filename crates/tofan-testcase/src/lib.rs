//! TestCase execution engine
//!
//! Turns a `TestCase` into live cluster resources and cleans them up again:
//! - Template instantiation: one (path, value) override applied to an `ObjectTemplate`
//! - Resource materialization: create-or-replace keyed by the manifest's own kind
//! - Phase state machine: `Pending -> InProgress -> {Completed | Error}`
//! - Readiness polling: one cancellable poller per TestCase
//! - Teardown: foreground collection delete by ownership label

pub mod client;
pub mod controller;
pub mod instantiate;
pub mod materialize;
pub mod readiness;
pub mod status;
pub mod store;
pub mod teardown;

pub use client::{KubeClient, KubeClientImpl};
pub use controller::{error_policy, reconcile, Context, ContextBuilder};
pub use readiness::{ReadinessWatcher, WatchOutcome, WatcherRegistry};
pub use store::{KubeResourceStore, ResourceStore};

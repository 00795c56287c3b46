//! ObjectTemplate controller
//!
//! Keeps the Tofan finalizer on every ObjectTemplate and records the group,
//! version and kind its template document produces, so TestCases can list
//! and delete materialized resources without parsing the template again.

pub mod client;
pub mod controller;

pub use client::{TemplateClient, TemplateClientImpl};
pub use controller::{error_policy, reconcile, Context};

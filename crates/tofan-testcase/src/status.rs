//! TestCase status transitions
//!
//! The reconciler and the readiness poller both write TestCase status. Every
//! write is a fetch-mutate-write against the latest stored object, guarded by
//! its resourceVersion and retried on conflict, so neither writer needs a lock
//! and the phase never moves backwards.

use tracing::debug;

use tofan_common::crd::{
    conditions, set_condition, Condition, ConditionStatus, TestCasePhase, TestCaseStatus,
};
use tofan_common::retry::{retry_on_conflict, RetryConfig};
use tofan_common::{Error, Result};

use crate::client::KubeClient;

/// A requested status change
#[derive(Clone, Debug)]
pub struct StatusChange {
    phase: TestCasePhase,
    conditions: Vec<Condition>,
    materialized: Option<u32>,
    skipped: Option<u32>,
    resources_ready: Option<bool>,
}

impl StatusChange {
    /// Move to `phase`
    pub fn to(phase: TestCasePhase) -> Self {
        Self {
            phase,
            conditions: Vec::new(),
            materialized: None,
            skipped: None,
            resources_ready: None,
        }
    }

    /// Set a condition as part of the change
    pub fn condition(
        mut self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        self.conditions
            .push(Condition::new(type_, status, reason, message));
        self
    }

    /// Record the counts of an instantiation pass
    pub fn counts(mut self, materialized: u32, skipped: u32) -> Self {
        self.materialized = Some(materialized);
        self.skipped = Some(skipped);
        self
    }

    /// Record whether every materialized resource was observed ready
    pub fn resources_ready(mut self, ready: bool) -> Self {
        self.resources_ready = Some(ready);
        self
    }

    /// Target phase of this change
    pub fn phase(&self) -> TestCasePhase {
        self.phase
    }

    /// Apply to `status`. Returns false, leaving `status` untouched, when the
    /// change would move the phase backwards.
    pub fn apply_to(&self, status: &mut TestCaseStatus) -> bool {
        if !TestCasePhase::may_follow(status.phase, self.phase) {
            return false;
        }
        status.phase = Some(self.phase);
        for condition in &self.conditions {
            set_condition(&mut status.conditions, condition.clone());
        }
        if let Some(materialized) = self.materialized {
            status.materialized = Some(materialized);
        }
        if let Some(skipped) = self.skipped {
            status.skipped = Some(skipped);
        }
        if let Some(ready) = self.resources_ready {
            status.resources_ready = Some(ready);
        }
        true
    }
}

/// Standard change for entering a phase, with its paired condition
pub fn phase_change(phase: TestCasePhase) -> StatusChange {
    match phase {
        TestCasePhase::Pending => StatusChange::to(phase).condition(
            conditions::READY,
            ConditionStatus::False,
            conditions::REASON_AWAITING_EXECUTION,
            conditions::MESSAGE_PENDING,
        ),
        TestCasePhase::InProgress => StatusChange::to(phase).condition(
            conditions::CREATING,
            ConditionStatus::True,
            conditions::REASON_EXECUTION_STARTED,
            conditions::MESSAGE_IN_PROGRESS,
        ),
        TestCasePhase::Completed => StatusChange::to(phase)
            .condition(
                conditions::CREATING,
                ConditionStatus::False,
                conditions::REASON_EXECUTION_SUCCESSFUL,
                conditions::MESSAGE_COMPLETED,
            )
            .condition(
                conditions::READY,
                ConditionStatus::True,
                conditions::REASON_EXECUTION_SUCCESSFUL,
                conditions::MESSAGE_COMPLETED,
            ),
        TestCasePhase::Error => StatusChange::to(phase)
            .condition(
                conditions::CREATING,
                ConditionStatus::False,
                conditions::REASON_EXECUTION_FAILED,
                conditions::MESSAGE_ERROR,
            )
            .condition(
                conditions::FAILED,
                ConditionStatus::True,
                conditions::REASON_EXECUTION_FAILED,
                conditions::MESSAGE_ERROR,
            ),
    }
}

/// Write `change` to the latest stored TestCase.
///
/// Returns `Ok(false)` when the stored phase has already moved past the
/// change; the write is skipped. Conflicts are retried per `retry`.
pub async fn update_status(
    kube: &dyn KubeClient,
    retry: &RetryConfig,
    name: &str,
    namespace: &str,
    change: &StatusChange,
) -> Result<bool> {
    retry_on_conflict(retry, "update_testcase_status", move || async move {
        let current = kube
            .get_test_case(name, namespace)
            .await?
            .ok_or_else(|| Error::not_found("TestCase", format!("{}/{}", namespace, name)))?;

        let mut status = current.status.clone().unwrap_or_default();
        if !change.apply_to(&mut status) {
            debug!(
                test_case = %name,
                current = ?status.phase,
                requested = %change.phase(),
                "Skipping status write that would regress phase"
            );
            return Ok(false);
        }
        if current.status.as_ref() == Some(&status) {
            return Ok(true);
        }

        kube.write_status(&current, &status).await?;
        Ok(true)
    })
    .await
}

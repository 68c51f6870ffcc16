//! Stack lifecycle control.
//!
//! Decides whether a stack is created, recreated or updated from its current
//! status, submits the mutation, and polls the control plane until the stack
//! settles. Nothing here retries a failed call; polling is a state wait.

use std::sync::Arc;
use std::time::Duration;

use nova_core::control_plane::{
    Capability, ControlPlane, CreateStackRequest, StackParameter, StackTag, UpdateStackRequest,
};
use nova_core::{ControlPlaneError, Error, ParameterBinding, Result, StackId, StackStatus};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Granted on every mutation so components may create identity resources.
pub const CAPABILITIES: [Capability; 2] = [Capability::Iam, Capability::NamedIam];

pub const PROJECT_TAG: &str = "nova-project";
pub const COMPONENT_TAG: &str = "nova-component";

/// What to do with a stack given its current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackAction {
    Create,
    /// Stuck in `ROLLBACK_COMPLETE`: delete, wait for it to disappear, create.
    Recreate,
    Update,
}

/// Decision table for a stack in `status`.
pub fn decide(stack: &str, status: StackStatus) -> Result<StackAction> {
    match status {
        StackStatus::DoesNotExist | StackStatus::DeleteComplete => Ok(StackAction::Create),
        StackStatus::RollbackComplete => Ok(StackAction::Recreate),
        s if s.is_complete() => Ok(StackAction::Update),
        _ => Err(Error::Conflict {
            stack: stack.to_string(),
            status,
        }),
    }
}

/// Result of a submitted create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMutation {
    Created(StackId),
    Updated(StackId),
    /// The update matched the live stack; nothing was changed.
    Unchanged(StackId),
}

impl StackMutation {
    pub fn stack_id(&self) -> &StackId {
        match self {
            StackMutation::Created(id) | StackMutation::Updated(id) | StackMutation::Unchanged(id) => {
                id
            }
        }
    }
}

/// Polling cadence and deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(15 * 60),
        }
    }
}

/// Checks that every parameter has a value and converts them for submission.
pub fn bind_parameters(bindings: &[ParameterBinding]) -> Result<Vec<StackParameter>> {
    bindings
        .iter()
        .map(|binding| match &binding.value {
            Some(value) => Ok(StackParameter {
                key: binding.parameter.name.clone(),
                value: value.clone(),
            }),
            None => Err(Error::MissingParameterValue {
                parameter: binding.parameter.name.clone(),
            }),
        })
        .collect()
}

/// Drives stacks on one control plane.
pub struct StackLifecycle {
    control_plane: Arc<dyn ControlPlane>,
    wait: WaitOptions,
}

impl StackLifecycle {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            control_plane,
            wait: WaitOptions::default(),
        }
    }

    pub fn with_wait_options(control_plane: Arc<dyn ControlPlane>, wait: WaitOptions) -> Self {
        Self {
            control_plane,
            wait,
        }
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    pub fn wait_options(&self) -> WaitOptions {
        self.wait
    }

    pub async fn status(&self, stack: &str) -> Result<StackStatus> {
        Ok(self.control_plane.stack_status(stack).await?)
    }

    /// Reads the status and, for a stuck rollback, deletes the stack and
    /// waits until it is gone. Returns the status to decide on.
    pub async fn prepare<F>(&self, stack: &str, on_waiting: F) -> Result<StackStatus>
    where
        F: FnMut(StackStatus),
    {
        let status = self.status(stack).await?;
        if status != StackStatus::RollbackComplete {
            return Ok(status);
        }

        info!(stack = %stack, "Stack is stuck in a rollback state, deleting it before deploying");
        self.delete_and_wait(stack, on_waiting).await?;
        Ok(StackStatus::DoesNotExist)
    }

    /// Creates or updates `stack` according to [`decide`].
    pub async fn apply(
        &self,
        stack: &str,
        status: StackStatus,
        template_url: &str,
        parameters: Vec<StackParameter>,
        tags: Vec<StackTag>,
    ) -> Result<StackMutation> {
        match decide(stack, status)? {
            StackAction::Create => {
                let id = self.create(stack, template_url, parameters, tags).await?;
                Ok(StackMutation::Created(id))
            }
            StackAction::Recreate => {
                self.delete_and_wait(stack, |_| {}).await?;
                let id = self.create(stack, template_url, parameters, tags).await?;
                Ok(StackMutation::Created(id))
            }
            StackAction::Update => self.update(stack, template_url, parameters).await,
        }
    }

    pub async fn create(
        &self,
        stack: &str,
        template_url: &str,
        parameters: Vec<StackParameter>,
        tags: Vec<StackTag>,
    ) -> Result<StackId> {
        info!(stack = %stack, "Creating stack");
        let id = self
            .control_plane
            .create_stack(CreateStackRequest {
                stack_name: stack.to_string(),
                template_url: template_url.to_string(),
                parameters,
                tags,
                capabilities: CAPABILITIES.to_vec(),
            })
            .await?;
        debug!(stack = %stack, stack_id = %id, "Stack creation started");
        Ok(id)
    }

    /// Updates an existing stack. A no-diff update is reported as
    /// [`StackMutation::Unchanged`].
    pub async fn update(
        &self,
        stack: &str,
        template_url: &str,
        parameters: Vec<StackParameter>,
    ) -> Result<StackMutation> {
        info!(stack = %stack, "Updating stack");
        let result = self
            .control_plane
            .update_stack(UpdateStackRequest {
                stack_name: stack.to_string(),
                template_url: template_url.to_string(),
                parameters,
                capabilities: CAPABILITIES.to_vec(),
            })
            .await;

        match result {
            Ok(id) => Ok(StackMutation::Updated(id)),
            Err(ControlPlaneError::NoChanges(_)) => {
                info!(stack = %stack, "No changes to deploy");
                let description = self
                    .control_plane
                    .describe_stack(stack)
                    .await?
                    .ok_or_else(|| ControlPlaneError::StackNotFound(stack.to_string()))?;
                Ok(StackMutation::Unchanged(description.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes `stack` and waits until the control plane no longer knows it.
    /// `on_waiting` sees every status observed before that.
    pub async fn delete_and_wait<F>(&self, stack: &str, mut on_waiting: F) -> Result<()>
    where
        F: FnMut(StackStatus),
    {
        self.control_plane.delete_stack(stack).await?;
        self.wait_for_terminal(stack, self.wait.interval, self.wait.max_wait, |status| {
            if status == StackStatus::DoesNotExist {
                return Ok(Some(()));
            }
            info!(stack = %stack, status = %status, "Still waiting for stack deletion");
            on_waiting(status);
            Ok(None)
        })
        .await
    }

    /// Waits for a submitted create or update to finish. Any failed, rolled
    /// back or rolling back status fails the deployment.
    pub async fn wait_for_deployment<F>(&self, stack: &str, mut on_waiting: F) -> Result<StackStatus>
    where
        F: FnMut(StackStatus),
    {
        self.wait_for_terminal(stack, self.wait.interval, self.wait.max_wait, |status| {
            deployment_policy(stack, status).inspect(|settled| {
                if settled.is_none() {
                    on_waiting(status);
                }
            })
        })
        .await
    }

    /// Polls the stack status every `interval` until `predicate` returns a
    /// value or an error, failing with a timeout once `deadline` has passed.
    pub async fn wait_for_terminal<T, P>(
        &self,
        stack: &str,
        interval: Duration,
        deadline: Duration,
        mut predicate: P,
    ) -> Result<T>
    where
        P: FnMut(StackStatus) -> Result<Option<T>>,
    {
        let start = Instant::now();
        loop {
            let status = self.status(stack).await?;
            debug!(stack = %stack, status = %status, "Polled stack status");

            if let Some(result) = predicate(status)? {
                return Ok(result);
            }

            let waited = start.elapsed();
            if waited >= deadline {
                return Err(Error::Timeout {
                    stack: stack.to_string(),
                    waited,
                });
            }

            sleep(interval).await;
        }
    }
}

/// Predicate used while waiting for a create or update to settle.
pub fn deployment_policy(stack: &str, status: StackStatus) -> Result<Option<StackStatus>> {
    if status.is_failed() || status.is_rolled_back() || status.is_rolling_back() {
        return Err(Error::DeploymentFailed {
            stack: stack.to_string(),
            status,
        });
    }
    if status.is_complete() {
        return Ok(Some(status));
    }
    Ok(None)
}

/// Tags identifying the owning project and component.
pub fn ownership_tags(project: &str, component: &str) -> Vec<StackTag> {
    vec![
        StackTag::new(PROJECT_TAG, project),
        StackTag::new(COMPONENT_TAG, component),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ControlPlaneCall, InMemoryControlPlane};
    use nova_core::template::Parameter;
    use std::collections::BTreeMap;

    fn lifecycle(cp: &Arc<InMemoryControlPlane>) -> StackLifecycle {
        StackLifecycle::with_wait_options(
            cp.clone(),
            WaitOptions {
                interval: Duration::from_secs(1),
                max_wait: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_decision_table() {
        assert_eq!(
            decide("s", StackStatus::DoesNotExist).unwrap(),
            StackAction::Create
        );
        assert_eq!(
            decide("s", StackStatus::RollbackComplete).unwrap(),
            StackAction::Recreate
        );
        assert_eq!(
            decide("s", StackStatus::CreateComplete).unwrap(),
            StackAction::Update
        );
        assert_eq!(
            decide("s", StackStatus::UpdateComplete).unwrap(),
            StackAction::Update
        );
        assert_eq!(
            decide("s", StackStatus::UpdateRollbackComplete).unwrap(),
            StackAction::Update
        );
        assert_eq!(
            decide("s", StackStatus::DeleteComplete).unwrap(),
            StackAction::Create
        );
        assert!(matches!(
            decide("s", StackStatus::CreateInProgress),
            Err(Error::Conflict { status: StackStatus::CreateInProgress, .. })
        ));
    }

    #[test]
    fn test_never_updates_busy_or_failed_stacks() {
        for status in StackStatus::ALL {
            if status.is_in_progress() || status.is_failed() {
                assert!(decide("s", status).is_err(), "{status} must be refused");
            }
        }
    }

    #[test]
    fn test_bind_parameters_requires_values() {
        let bound = bind_parameters(&[ParameterBinding::new(Parameter::new("Stage"), "prod")])
            .unwrap();
        assert_eq!(
            bound,
            vec![StackParameter {
                key: "Stage".to_string(),
                value: "prod".to_string()
            }]
        );

        let err = bind_parameters(&[ParameterBinding {
            parameter: Parameter::new("Stage"),
            value: None,
        }])
        .unwrap_err();
        assert!(matches!(err, Error::MissingParameterValue { parameter } if parameter == "Stage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_as_soon_as_predicate_yields() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.insert_stack("s", StackStatus::CreateInProgress, BTreeMap::new())
            .await;
        cp.script(
            "s",
            [
                StackStatus::CreateInProgress,
                StackStatus::CreateInProgress,
                StackStatus::CreateComplete,
            ],
        )
        .await;

        let mut polls = 0;
        let status = lifecycle(&cp)
            .wait_for_terminal("s", Duration::from_secs(1), Duration::from_secs(60), |s| {
                polls += 1;
                Ok(s.is_complete().then_some(s))
            })
            .await
            .unwrap();
        assert_eq!(status, StackStatus::CreateComplete);
        assert_eq!(polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_with_zero_deadline() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let err = lifecycle(&cp)
            .wait_for_terminal("s", Duration::from_secs(1), Duration::ZERO, |_| {
                Ok(None::<()>)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { stack, .. } if stack == "s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deployment_fails_on_rollback() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.insert_stack("s", StackStatus::UpdateInProgress, BTreeMap::new())
            .await;
        cp.script(
            "s",
            [
                StackStatus::UpdateInProgress,
                StackStatus::UpdateRollbackInProgress,
            ],
        )
        .await;

        let mut waits = Vec::new();
        let err = lifecycle(&cp)
            .wait_for_deployment("s", |status| waits.push(status))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DeploymentFailed { status: StackStatus::UpdateRollbackInProgress, .. }
        ));
        assert_eq!(waits, vec![StackStatus::UpdateInProgress]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_recovers_stuck_rollback() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.insert_stack("s", StackStatus::RollbackComplete, BTreeMap::new())
            .await;

        let status = lifecycle(&cp).prepare("s", |_| {}).await.unwrap();
        assert_eq!(status, StackStatus::DoesNotExist);
        assert!(
            cp.calls()
                .await
                .contains(&ControlPlaneCall::Delete("s".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_reports_deletion_progress() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.insert_stack("s", StackStatus::RollbackComplete, BTreeMap::new())
            .await;
        cp.script(
            "s",
            [
                StackStatus::RollbackComplete,
                StackStatus::DeleteInProgress,
                StackStatus::DeleteInProgress,
                StackStatus::DoesNotExist,
            ],
        )
        .await;

        let mut waits = Vec::new();
        let status = lifecycle(&cp)
            .prepare("s", |status| waits.push(status))
            .await
            .unwrap();
        assert_eq!(status, StackStatus::DoesNotExist);
        assert_eq!(
            waits,
            vec![StackStatus::DeleteInProgress, StackStatus::DeleteInProgress]
        );
    }

    #[tokio::test]
    async fn test_apply_creates_then_updates() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let lifecycle = lifecycle(&cp);

        let created = lifecycle
            .apply(
                "s",
                StackStatus::DoesNotExist,
                "file:///t1.json",
                vec![],
                ownership_tags("shop", "api"),
            )
            .await
            .unwrap();
        assert!(matches!(created, StackMutation::Created(_)));

        let updated = lifecycle
            .apply("s", StackStatus::CreateComplete, "file:///t2.json", vec![], vec![])
            .await
            .unwrap();
        assert_eq!(updated, StackMutation::Updated(created.stack_id().clone()));

        let unchanged = lifecycle
            .apply("s", StackStatus::UpdateComplete, "file:///t2.json", vec![], vec![])
            .await
            .unwrap();
        assert_eq!(unchanged, StackMutation::Unchanged(created.stack_id().clone()));

        let creates: Vec<_> = cp
            .calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                ControlPlaneCall::Create(request) => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].capabilities, CAPABILITIES.to_vec());
        assert_eq!(creates[0].tags, ownership_tags("shop", "api"));
    }

    #[tokio::test]
    async fn test_apply_refuses_busy_stack_without_mutation() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let err = lifecycle(&cp)
            .apply("s", StackStatus::UpdateInProgress, "file:///t.json", vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(cp.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_mutation_is_not_retried() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.reject_next_mutation("s", "template is malformed").await;
        let err = lifecycle(&cp)
            .create("s", "file:///t.json", vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ControlPlane(ControlPlaneError::Rejected { .. })
        ));
        assert_eq!(cp.mutation_count().await, 1);
    }
}

//! In-memory control plane.
//!
//! Mutations settle immediately unless a status script is queued for the
//! stack, in which case each describe call advances the stack one scripted
//! status. Every call is recorded so tests can assert on what was submitted.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use nova_core::control_plane::{
    ControlPlane, CreateStackRequest, StackDescription, StackOutputs, StackParameter,
    UpdateStackRequest,
};
use nova_core::{ControlPlaneError, StackId, StackStatus};
use tokio::sync::Mutex;

/// A call received by [`InMemoryControlPlane`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPlaneCall {
    Describe(String),
    Create(CreateStackRequest),
    Update(UpdateStackRequest),
    Delete(String),
}

impl ControlPlaneCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ControlPlaneCall::Describe(_))
    }
}

#[derive(Debug, Clone)]
struct StoredStack {
    id: StackId,
    status: StackStatus,
    outputs: StackOutputs,
    template_url: Option<String>,
    parameters: Vec<StackParameter>,
}

#[derive(Debug, Default)]
struct State {
    stacks: BTreeMap<String, StoredStack>,
    scripts: HashMap<String, VecDeque<StackStatus>>,
    deploy_outputs: HashMap<String, StackOutputs>,
    rejections: HashMap<String, String>,
    calls: Vec<ControlPlaneCall>,
    next_id: u64,
}

impl State {
    fn allocate_id(&mut self, name: &str) -> StackId {
        self.next_id += 1;
        StackId::new(format!("nova:stack/{name}/{}", self.next_id))
    }

    fn take_rejection(&mut self, name: &str) -> Result<(), ControlPlaneError> {
        match self.rejections.remove(name) {
            Some(message) => Err(ControlPlaneError::Rejected {
                stack: name.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }

    fn settled_status(
        &self,
        name: &str,
        in_progress: StackStatus,
        settled: StackStatus,
    ) -> StackStatus {
        if self.scripts.get(name).is_some_and(|s| !s.is_empty()) {
            in_progress
        } else {
            settled
        }
    }
}

/// Control plane that keeps stacks in process memory.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a stack as if it had been deployed earlier.
    pub async fn insert_stack(&self, name: &str, status: StackStatus, outputs: StackOutputs) {
        let mut state = self.state.lock().await;
        let id = state.allocate_id(name);
        state.stacks.insert(
            name.to_string(),
            StoredStack {
                id,
                status,
                outputs,
                template_url: None,
                parameters: Vec::new(),
            },
        );
    }

    /// Queues statuses the stack passes through, one per describe call once
    /// the stack exists. `DoesNotExist` removes the stack record.
    pub async fn script<I>(&self, name: &str, statuses: I)
    where
        I: IntoIterator<Item = StackStatus>,
    {
        let mut state = self.state.lock().await;
        state
            .scripts
            .entry(name.to_string())
            .or_default()
            .extend(statuses);
    }

    /// Outputs a stack reports after its next create or update.
    pub async fn set_deploy_outputs(&self, name: &str, outputs: StackOutputs) {
        self.state
            .lock()
            .await
            .deploy_outputs
            .insert(name.to_string(), outputs);
    }

    /// Makes the next mutation of `name` fail with a rejection.
    pub async fn reject_next_mutation(&self, name: &str, message: &str) {
        self.state
            .lock()
            .await
            .rejections
            .insert(name.to_string(), message.to_string());
    }

    pub async fn calls(&self) -> Vec<ControlPlaneCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn mutation_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .count()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn describe_stack(
        &self,
        name: &str,
    ) -> Result<Option<StackDescription>, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.push(ControlPlaneCall::Describe(name.to_string()));

        let next = if state.stacks.contains_key(name) {
            state.scripts.get_mut(name).and_then(VecDeque::pop_front)
        } else {
            None
        };
        match next {
            Some(StackStatus::DoesNotExist) => {
                state.stacks.remove(name);
            }
            Some(status) => {
                if let Some(stack) = state.stacks.get_mut(name) {
                    stack.status = status;
                }
            }
            None => {}
        }

        Ok(state.stacks.get(name).map(|stack| StackDescription {
            id: stack.id.clone(),
            name: name.to_string(),
            status: stack.status,
            outputs: stack.outputs.clone(),
        }))
    }

    async fn create_stack(&self, request: CreateStackRequest) -> Result<StackId, ControlPlaneError> {
        let mut state = self.state.lock().await;
        let name = request.stack_name.clone();
        state.calls.push(ControlPlaneCall::Create(request.clone()));
        state.take_rejection(&name)?;

        if let Some(existing) = state.stacks.get(&name) {
            if existing.status != StackStatus::DeleteComplete {
                return Err(ControlPlaneError::Rejected {
                    stack: name,
                    message: "stack already exists".to_string(),
                });
            }
        }

        let id = state.allocate_id(&name);
        let status = state.settled_status(
            &name,
            StackStatus::CreateInProgress,
            StackStatus::CreateComplete,
        );
        let outputs = state.deploy_outputs.get(&name).cloned().unwrap_or_default();
        state.stacks.insert(
            name,
            StoredStack {
                id: id.clone(),
                status,
                outputs,
                template_url: Some(request.template_url),
                parameters: request.parameters,
            },
        );
        Ok(id)
    }

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<StackId, ControlPlaneError> {
        let mut state = self.state.lock().await;
        let name = request.stack_name.clone();
        state.calls.push(ControlPlaneCall::Update(request.clone()));
        state.take_rejection(&name)?;

        let status = state.settled_status(
            &name,
            StackStatus::UpdateInProgress,
            StackStatus::UpdateComplete,
        );
        let outputs = state.deploy_outputs.get(&name).cloned();
        let stack = state
            .stacks
            .get_mut(&name)
            .ok_or_else(|| ControlPlaneError::StackNotFound(name.clone()))?;

        if stack.template_url.as_deref() == Some(request.template_url.as_str())
            && stack.parameters == request.parameters
        {
            return Err(ControlPlaneError::NoChanges(name));
        }

        stack.status = status;
        stack.template_url = Some(request.template_url);
        stack.parameters = request.parameters;
        if let Some(outputs) = outputs {
            stack.outputs = outputs;
        }
        Ok(stack.id.clone())
    }

    async fn delete_stack(&self, name: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.calls.push(ControlPlaneCall::Delete(name.to_string()));
        state.take_rejection(name)?;

        if !state.stacks.contains_key(name) {
            return Err(ControlPlaneError::StackNotFound(name.to_string()));
        }
        if state.scripts.get(name).is_some_and(|s| !s.is_empty()) {
            if let Some(stack) = state.stacks.get_mut(name) {
                stack.status = StackStatus::DeleteInProgress;
            }
        } else {
            state.stacks.remove(name);
        }
        Ok(())
    }
}

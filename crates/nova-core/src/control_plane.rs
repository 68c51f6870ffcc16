//! Control-plane abstraction.
//!
//! A control plane owns stacks: it accepts create, update and delete
//! requests asynchronously and reports progress only through stack status.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ControlPlaneError;
use crate::id::StackId;
use crate::stack::StackStatus;

/// Output name to value.
pub type StackOutputs = BTreeMap<String, String>;

/// What the control plane knows about a live stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDescription {
    pub id: StackId,
    pub name: String,
    pub status: StackStatus,
    pub outputs: StackOutputs,
}

/// Permission grants a stack mutation may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// Create identity resources with generated names.
    #[serde(rename = "CAPABILITY_IAM")]
    Iam,
    /// Create identity resources with custom names.
    #[serde(rename = "CAPABILITY_NAMED_IAM")]
    NamedIam,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Iam => "CAPABILITY_IAM",
            Capability::NamedIam => "CAPABILITY_NAMED_IAM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackParameter {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTag {
    pub key: String,
    pub value: String,
}

impl StackTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateStackRequest {
    pub stack_name: String,
    pub template_url: String,
    pub parameters: Vec<StackParameter>,
    pub tags: Vec<StackTag>,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStackRequest {
    pub stack_name: String,
    pub template_url: String,
    pub parameters: Vec<StackParameter>,
    pub capabilities: Vec<Capability>,
}

/// Trait for control-plane backends.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Describe a stack, or `None` when no record exists.
    async fn describe_stack(
        &self,
        name: &str,
    ) -> Result<Option<StackDescription>, ControlPlaneError>;

    /// Current status, `DoesNotExist` when there is no record.
    async fn stack_status(&self, name: &str) -> Result<StackStatus, ControlPlaneError> {
        Ok(self
            .describe_stack(name)
            .await?
            .map(|stack| stack.status)
            .unwrap_or(StackStatus::DoesNotExist))
    }

    /// Current outputs of an existing stack.
    async fn stack_outputs(&self, name: &str) -> Result<StackOutputs, ControlPlaneError> {
        self.describe_stack(name)
            .await?
            .map(|stack| stack.outputs)
            .ok_or_else(|| ControlPlaneError::StackNotFound(name.to_string()))
    }

    /// Start creating a stack.
    async fn create_stack(&self, request: CreateStackRequest) -> Result<StackId, ControlPlaneError>;

    /// Start updating an existing stack.
    async fn update_stack(&self, request: UpdateStackRequest) -> Result<StackId, ControlPlaneError>;

    /// Start deleting a stack.
    async fn delete_stack(&self, name: &str) -> Result<(), ControlPlaneError>;
}

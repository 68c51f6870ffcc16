//! Per-deployment state threaded through the pipeline stages.

use chrono::{DateTime, SecondsFormat, Utc};
use nova_core::control_plane::StackParameter;
use nova_core::{
    ComponentRef, DependencyOutputs, DeploymentId, PublishedTemplate, StackId, StackOutputs,
    StackStatus,
};
use nova_deployer::StackMutation;
use serde::Serialize;

/// Everything one deployment attempt has learned so far. Each stage fills
/// in its part; nothing is shared between deployments.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    pub component: ComponentRef,
    pub stack_name: String,
    pub deployment_id: DeploymentId,
    pub started_at: DateTime<Utc>,
    pub region: Option<String>,
    /// Resolved dependency order, excluding the component itself.
    pub dependencies: Vec<String>,
    pub dependency_outputs: DependencyOutputs,
    /// Serialized template, empty until the template stage ran.
    pub template_body: Option<String>,
    pub parameters: Vec<StackParameter>,
    pub published: Option<PublishedTemplate>,
    /// Status observed before mutating, after any rollback recovery.
    pub initial_status: Option<StackStatus>,
    pub mutation: Option<StackMutation>,
    pub final_status: Option<StackStatus>,
    pub outputs: StackOutputs,
}

impl DeploymentContext {
    pub fn new(component: ComponentRef) -> Self {
        Self::with_identity(component, DeploymentId::new(), Utc::now())
    }

    pub fn with_identity(
        component: ComponentRef,
        deployment_id: DeploymentId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stack_name: component.stack_name(),
            component,
            deployment_id,
            started_at,
            region: None,
            dependencies: Vec::new(),
            dependency_outputs: DependencyOutputs::new(),
            template_body: None,
            parameters: Vec::new(),
            published: None,
            initial_status: None,
            mutation: None,
            final_status: None,
            outputs: StackOutputs::new(),
        }
    }

    pub fn stack_id(&self) -> Option<&StackId> {
        self.mutation.as_ref().map(StackMutation::stack_id)
    }

    pub fn template_url(&self) -> Option<&str> {
        self.published.as_ref().map(|p| p.url.as_str())
    }

    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            project: self.component.project.clone(),
            component: self.component.component.clone(),
            deployment_id: self.deployment_id.to_string(),
            stack_name: self.stack_name.clone(),
            stack_id: self.stack_id().map(ToString::to_string),
            status: self.final_status.map(|s| s.to_string()),
            template_url: self.template_url().map(str::to_string),
            deployed_at: self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            outputs: self.outputs.clone(),
        }
    }
}

/// Result of a completed deployment. Serializes as one flat object with the
/// stack outputs merged in next to the summary fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentSummary {
    pub project: String,
    pub component: String,
    pub deployment_id: String,
    pub stack_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,
    pub deployed_at: String,
    #[serde(flatten)]
    pub outputs: StackOutputs,
}

impl DeploymentSummary {
    /// Summary fields followed by stack outputs, in display order.
    pub fn fields(&self) -> Vec<(&str, &str)> {
        let mut fields = vec![
            ("project", self.project.as_str()),
            ("component", self.component.as_str()),
            ("deployment_id", self.deployment_id.as_str()),
            ("stack_name", self.stack_name.as_str()),
        ];
        if let Some(id) = &self.stack_id {
            fields.push(("stack_id", id.as_str()));
        }
        if let Some(status) = &self.status {
            fields.push(("status", status.as_str()));
        }
        if let Some(url) = &self.template_url {
            fields.push(("template_url", url.as_str()));
        }
        fields.push(("deployed_at", self.deployed_at.as_str()));
        fields.extend(self.outputs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        fields
    }
}

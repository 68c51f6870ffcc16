//! File-backed control plane.
//!
//! Stacks live in a JSON state file. Templates are read back from their
//! `file://` URL and outputs are evaluated locally, so a full deploy can run
//! without any remote service. Mutations settle synchronously.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nova_core::control_plane::{
    ControlPlane, CreateStackRequest, StackDescription, StackOutputs, StackParameter,
    StackTag, UpdateStackRequest,
};
use nova_core::{ControlPlaneError, StackId, StackStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StackRecord {
    id: StackId,
    status: StackStatus,
    template_url: String,
    template_checksum: String,
    parameters: Vec<StackParameter>,
    #[serde(default)]
    tags: Vec<StackTag>,
    outputs: StackOutputs,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    stacks: BTreeMap<String, StackRecord>,
}

/// Control plane persisting stacks to a local JSON file.
#[derive(Debug)]
pub struct LocalControlPlane {
    state_path: PathBuf,
    lock: Mutex<()>,
}

impl LocalControlPlane {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn load(&self) -> Result<StateFile, ControlPlaneError> {
        match tokio::fs::read(&self.state_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ControlPlaneError::Unavailable(format!(
                    "corrupt state file {}: {e}",
                    self.state_path.display()
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateFile::default()),
            Err(e) => Err(unavailable(&self.state_path, e)),
        }
    }

    async fn save(&self, state: &StateFile) -> Result<(), ControlPlaneError> {
        if let Some(parent) = self.state_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| unavailable(parent, e))?;
            }
        }
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))?;
        tokio::fs::write(&self.state_path, body)
            .await
            .map_err(|e| unavailable(&self.state_path, e))
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> ControlPlaneError {
    ControlPlaneError::Unavailable(format!("{}: {e}", path.display()))
}

fn rejected(stack: &str, message: impl Into<String>) -> ControlPlaneError {
    ControlPlaneError::Rejected {
        stack: stack.to_string(),
        message: message.into(),
    }
}

/// A template fetched from its URL.
struct FetchedTemplate {
    document: Value,
    checksum: String,
}

async fn fetch_template(stack: &str, template_url: &str) -> Result<FetchedTemplate, ControlPlaneError> {
    let url = Url::parse(template_url)
        .map_err(|e| rejected(stack, format!("invalid template URL {template_url}: {e}")))?;
    let path = url
        .to_file_path()
        .map_err(|_| rejected(stack, format!("template URL is not a local file: {template_url}")))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| rejected(stack, format!("cannot read template {}: {e}", path.display())))?;
    let document = serde_json::from_slice(&bytes)
        .map_err(|e| rejected(stack, format!("template is not valid JSON: {e}")))?;
    Ok(FetchedTemplate {
        document,
        checksum: hex::encode(Sha256::digest(&bytes)),
    })
}

/// Evaluates template outputs the way a control plane would after a deploy.
///
/// `Ref` to a parameter yields its bound value or default; `Ref` to a
/// resource yields a physical id derived from the stack name.
fn evaluate_outputs(stack: &str, document: &Value, parameters: &[StackParameter]) -> StackOutputs {
    let Some(outputs) = document.get("Outputs").and_then(Value::as_object) else {
        return StackOutputs::new();
    };

    let mut values: BTreeMap<&str, String> = BTreeMap::new();
    if let Some(declared) = document.get("Parameters").and_then(Value::as_object) {
        for (name, definition) in declared {
            if let Some(default) = definition.get("Default").and_then(Value::as_str) {
                values.insert(name, default.to_string());
            }
        }
    }
    for parameter in parameters {
        values.insert(&parameter.key, parameter.value.clone());
    }

    outputs
        .iter()
        .map(|(name, output)| {
            let value = output
                .get("Value")
                .map(|v| evaluate(stack, v, &values))
                .unwrap_or_default();
            (name.clone(), value)
        })
        .collect()
}

fn evaluate(stack: &str, value: &Value, parameters: &BTreeMap<&str, String>) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get("Ref") {
                return parameters
                    .get(name.as_str())
                    .cloned()
                    .unwrap_or_else(|| format!("{stack}-{name}"));
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                let parts: Vec<String> = parts
                    .iter()
                    .map(|p| evaluate(stack, p, parameters))
                    .collect();
                return format!("{stack}-{}", parts.join("."));
            }
            if let Some(Value::Array(args)) = map.get("Fn::Join") {
                if let [Value::String(separator), Value::Array(items)] = args.as_slice() {
                    return items
                        .iter()
                        .map(|item| evaluate(stack, item, parameters))
                        .collect::<Vec<_>>()
                        .join(separator.as_str());
                }
            }
            value.to_string()
        }
        other => other.to_string(),
    }
}

#[async_trait]
impl ControlPlane for LocalControlPlane {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn describe_stack(
        &self,
        name: &str,
    ) -> Result<Option<StackDescription>, ControlPlaneError> {
        let _guard = self.lock.lock().await;
        let state = self.load().await?;
        Ok(state.stacks.get(name).map(|record| StackDescription {
            id: record.id.clone(),
            name: name.to_string(),
            status: record.status,
            outputs: record.outputs.clone(),
        }))
    }

    async fn create_stack(&self, request: CreateStackRequest) -> Result<StackId, ControlPlaneError> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let name = request.stack_name;

        if state
            .stacks
            .get(&name)
            .is_some_and(|r| r.status != StackStatus::DeleteComplete)
        {
            return Err(rejected(&name, "stack already exists"));
        }

        let template = fetch_template(&name, &request.template_url).await?;
        let now = Utc::now();
        let id = StackId::new(format!("local:stack/{name}/{}", now.timestamp_millis()));
        let outputs = evaluate_outputs(&name, &template.document, &request.parameters);

        debug!(stack = %name, id = %id, "Creating local stack");
        state.stacks.insert(
            name,
            StackRecord {
                id: id.clone(),
                status: StackStatus::CreateComplete,
                template_url: request.template_url,
                template_checksum: template.checksum,
                parameters: request.parameters,
                tags: request.tags,
                outputs,
                updated_at: now,
            },
        );
        self.save(&state).await?;
        Ok(id)
    }

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<StackId, ControlPlaneError> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let name = request.stack_name;
        let template = fetch_template(&name, &request.template_url).await?;

        let record = state
            .stacks
            .get_mut(&name)
            .ok_or_else(|| ControlPlaneError::StackNotFound(name.clone()))?;

        if record.template_checksum == template.checksum && record.parameters == request.parameters
        {
            return Err(ControlPlaneError::NoChanges(name));
        }

        debug!(stack = %name, id = %record.id, "Updating local stack");
        record.outputs = evaluate_outputs(&name, &template.document, &request.parameters);
        record.status = StackStatus::UpdateComplete;
        record.template_url = request.template_url;
        record.template_checksum = template.checksum;
        record.parameters = request.parameters;
        record.updated_at = Utc::now();
        let id = record.id.clone();

        self.save(&state).await?;
        Ok(id)
    }

    async fn delete_stack(&self, name: &str) -> Result<(), ControlPlaneError> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        if state.stacks.remove(name).is_none() {
            return Err(ControlPlaneError::StackNotFound(name.to_string()));
        }
        debug!(stack = %name, "Deleted local stack");
        self.save(&state).await
    }
}

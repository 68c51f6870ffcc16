//! Template publishing abstraction.
//!
//! Stack mutations reference templates by URL, so every template is first
//! uploaded to a blob store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::component::ComponentRef;
use crate::id::DeploymentId;

/// Reference to a published template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedTemplate {
    /// URL the control plane fetches the template from.
    pub url: String,
    /// Storage key.
    pub key: String,
    /// SHA-256 of the body, hex encoded.
    pub checksum: String,
    pub size: u64,
}

/// Trait for template blob stores.
#[async_trait]
pub trait TemplatePublisher: Send + Sync {
    /// Name of this backend.
    fn name(&self) -> &'static str;

    /// Store `body` under `key` and return where it can be fetched.
    async fn publish(&self, key: &str, body: Bytes) -> Result<PublishedTemplate>;
}

/// `{prefix}{project}/{component}/{deployment}/templates/{stack}-{timestamp}.json`
pub fn template_key(
    prefix: &str,
    component: &ComponentRef,
    deployment_id: &DeploymentId,
    stack_name: &str,
    date: &DateTime<Utc>,
) -> String {
    format!(
        "{prefix}{}/{}/{deployment_id}/templates/{stack_name}-{}.json",
        component.project,
        component.component,
        date.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

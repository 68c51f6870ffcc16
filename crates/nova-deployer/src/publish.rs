//! Template publisher writing to a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use nova_core::{Error, PublishedTemplate, Result, TemplatePublisher};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

/// Stores templates under `root/{key}` and hands out `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    root: PathBuf,
}

impl LocalPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn publish_error(key: &str, message: impl Into<String>) -> Error {
    Error::Publish {
        key: key.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl TemplatePublisher for LocalPublisher {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn publish(&self, key: &str, body: Bytes) -> Result<PublishedTemplate> {
        let root = std::path::absolute(&self.root)?;
        let path = root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;

        let url = Url::from_file_path(&path)
            .map_err(|_| publish_error(key, format!("not an absolute path: {}", path.display())))?;
        debug!(key = %key, path = %path.display(), "Published template");

        Ok(PublishedTemplate {
            url: url.to_string(),
            key: key.to_string(),
            checksum: hex::encode(Sha256::digest(&body)),
            size: body.len() as u64,
        })
    }
}

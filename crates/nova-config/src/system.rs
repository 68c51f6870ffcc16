//! System configuration parsing.
//!
//! ```kdl
//! output-format "text"
//! projects-dir "projects"
//! publisher "local" root=".nova/templates" key-prefix="nova/"
//! control-plane "local" state=".nova/stacks.json"
//! wait interval-seconds=1 max-seconds=900
//! ```
//!
//! Every node is optional.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

use crate::project::get_string_prop;
use crate::{ConfigError, ConfigResult};

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}', expected text or json")),
        }
    }
}

/// Where published templates are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PublisherConfig {
    Local { root: PathBuf, key_prefix: String },
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig::Local {
            root: PathBuf::from(".nova/templates"),
            key_prefix: "nova/".to_string(),
        }
    }
}

/// Which control plane owns the stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ControlPlaneConfig {
    /// JSON state file on disk.
    Local { state: PathBuf },
    /// Process memory; nothing survives the command.
    Memory,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        ControlPlaneConfig::Local {
            state: PathBuf::from(".nova/stacks.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    pub interval_seconds: u64,
    pub max_seconds: u64,
}

impl WaitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_seconds)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 1,
            max_seconds: 15 * 60,
        }
    }
}

/// System-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub output_format: OutputFormat,
    /// Directory holding `<project>.kdl` files.
    pub projects_dir: PathBuf,
    pub publisher: PublisherConfig,
    pub control_plane: ControlPlaneConfig,
    pub wait: WaitConfig,
}

impl SystemConfig {
    /// Defaults with `projects_dir` set to `projects`.
    pub fn new() -> Self {
        Self {
            projects_dir: PathBuf::from("projects"),
            ..Default::default()
        }
    }

    /// Load from `path`. A missing file yields the defaults unless
    /// `required` is set.
    pub fn load(path: &Path, required: bool) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => parse_system_config(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::new();

    for node in doc.nodes() {
        match node.name().value() {
            "output-format" => {
                let value = required_arg(node, "output-format")?;
                config.output_format = value.parse().map_err(|message| ConfigError::InvalidValue {
                    field: "output-format".to_string(),
                    message,
                })?;
            }
            "projects-dir" => {
                config.projects_dir = PathBuf::from(required_arg(node, "projects-dir")?);
            }
            "publisher" => {
                config.publisher = parse_publisher(node)?;
            }
            "control-plane" => {
                config.control_plane = parse_control_plane(node)?;
            }
            "wait" => {
                let defaults = WaitConfig::default();
                config.wait = WaitConfig {
                    interval_seconds: get_u64_prop(node, "interval-seconds")?
                        .unwrap_or(defaults.interval_seconds),
                    max_seconds: get_u64_prop(node, "max-seconds")?.unwrap_or(defaults.max_seconds),
                };
                if config.wait.interval_seconds == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "wait interval-seconds".to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_publisher(node: &KdlNode) -> ConfigResult<PublisherConfig> {
    let kind = required_arg(node, "publisher")?;
    match kind.as_str() {
        "local" => {
            let PublisherConfig::Local { root, key_prefix } = PublisherConfig::default();
            Ok(PublisherConfig::Local {
                root: get_string_prop(node, "root").map(PathBuf::from).unwrap_or(root),
                key_prefix: get_string_prop(node, "key-prefix").unwrap_or(key_prefix),
            })
        }
        _ => Err(ConfigError::InvalidValue {
            field: "publisher".to_string(),
            message: format!("unknown publisher kind: {kind}"),
        }),
    }
}

fn parse_control_plane(node: &KdlNode) -> ConfigResult<ControlPlaneConfig> {
    let kind = required_arg(node, "control-plane")?;
    match kind.as_str() {
        "local" => Ok(ControlPlaneConfig::Local {
            state: get_string_prop(node, "state")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".nova/stacks.json")),
        }),
        "memory" => Ok(ControlPlaneConfig::Memory),
        _ => Err(ConfigError::InvalidValue {
            field: "control-plane".to_string(),
            message: format!("unknown control plane kind: {kind}"),
        }),
    }
}

fn required_arg(node: &KdlNode, field: &str) -> ConfigResult<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))
}

fn get_u64_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u64>> {
    let Some(value) = node.get(name) else {
        return Ok(None);
    };
    value
        .as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: name.to_string(),
            message: format!("expected a non-negative integer, got {value}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config, SystemConfig::new());
        assert_eq!(config.projects_dir, PathBuf::from("projects"));
        assert_eq!(config.wait.max_wait(), Duration::from_secs(900));
        assert_eq!(config.output_format, OutputFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            output-format "json"
            projects-dir "infra/projects"
            publisher "local" root="/tmp/templates" key-prefix="acme/"
            control-plane "memory"
            wait interval-seconds=5 max-seconds=60
        "#;
        let config = parse_system_config(kdl).unwrap();
        assert_eq!(config.output_format, OutputFormat::Json);
        assert_eq!(config.projects_dir, PathBuf::from("infra/projects"));
        assert_eq!(
            config.publisher,
            PublisherConfig::Local {
                root: PathBuf::from("/tmp/templates"),
                key_prefix: "acme/".to_string(),
            }
        );
        assert_eq!(config.control_plane, ControlPlaneConfig::Memory);
        assert_eq!(config.wait.interval(), Duration::from_secs(5));
        assert_eq!(config.wait.max_wait(), Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_kinds_rejected() {
        assert!(matches!(
            parse_system_config(r#"publisher "s3""#).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert!(matches!(
            parse_system_config(r#"control-plane "aws""#).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert!(matches!(
            parse_system_config(r#"output-format "yaml""#).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        assert!(matches!(
            parse_system_config("wait interval-seconds=0").unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nova.kdl");
        assert_eq!(SystemConfig::load(&path, false).unwrap(), SystemConfig::new());
        assert!(matches!(
            SystemConfig::load(&path, true).unwrap_err(),
            ConfigError::Io(_)
        ));

        std::fs::write(&path, r#"projects-dir "p""#).unwrap();
        assert_eq!(
            SystemConfig::load(&path, true).unwrap().projects_dir,
            PathBuf::from("p")
        );
    }
}

//! CLI command implementations.

pub mod deploy;
pub mod inspect;

pub use deploy::deploy;
pub use inspect::{order, validate};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nova_config::{OutputFormat, ProjectSpec, SystemConfig};
use tracing::debug;

const DEFAULT_CONFIG: &str = "nova.kdl";

/// System configuration with command-line overrides applied.
#[derive(Debug, Clone)]
pub struct Settings {
    pub system: SystemConfig,
}

impl Settings {
    /// Load the system configuration. An explicitly named file must exist;
    /// a missing `nova.kdl` in the working directory means defaults.
    pub fn load(
        config: Option<&Path>,
        projects_dir: Option<PathBuf>,
        output_format: Option<OutputFormat>,
    ) -> Result<Self> {
        let (path, required) = match config {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG), false),
        };
        let mut system = SystemConfig::load(path, required)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        if let Some(dir) = projects_dir {
            system.projects_dir = dir;
        }
        if let Some(format) = output_format {
            system.output_format = format;
        }
        debug!(config = %path.display(), projects_dir = %system.projects_dir.display(), "Loaded settings");

        Ok(Self { system })
    }

    pub fn output_format(&self) -> OutputFormat {
        self.system.output_format
    }

    /// Load `<projects_dir>/<name>.kdl` and check its output references.
    pub fn load_project(&self, name: &str) -> Result<ProjectSpec> {
        let spec = nova_config::load_project(&self.system.projects_dir, name)
            .with_context(|| format!("Failed to load project '{name}'"))?;
        spec.check_references()
            .with_context(|| format!("Project '{name}' is invalid"))?;
        Ok(spec)
    }
}

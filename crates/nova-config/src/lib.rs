//! KDL configuration parsing for Nova.
//!
//! This crate handles parsing of:
//! - Project files (components, resources, outputs, parameters)
//! - System configuration (nova.kdl)
//! - Dependency output interpolation

pub mod error;
pub mod project;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use project::{ComponentSpec, ProjectSpec, load_project, parse_project};
pub use system::{
    ControlPlaneConfig, OutputFormat, PublisherConfig, SystemConfig, WaitConfig,
    parse_system_config,
};
pub use variables::{OutputContext, OutputReference};

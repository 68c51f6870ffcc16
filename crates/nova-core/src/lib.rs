//! Core domain types and traits for Nova.
//!
//! This crate contains:
//! - Error taxonomy and identifiers
//! - Components, projects and the build function contract
//! - Dependency-order resolution
//! - Resource definitions, the built-in catalog and templates
//! - Stack status model
//! - Control-plane and template publisher abstractions

pub mod component;
pub mod control_plane;
pub mod error;
pub mod graph;
pub mod id;
pub mod publish;
pub mod resource;
pub mod stack;
pub mod template;

pub use component::{
    BuildCallback, BuildFn, BuildOptions, BuildResult, Component, ComponentRef,
    DependencyOutputs, ParameterBinding, Project,
};
pub use control_plane::{ControlPlane, StackDescription, StackOutputs};
pub use error::{ControlPlaneError, Error, GraphError, Result, ValidationError};
pub use id::{DeploymentId, StackId};
pub use publish::{PublishedTemplate, TemplatePublisher};
pub use stack::StackStatus;

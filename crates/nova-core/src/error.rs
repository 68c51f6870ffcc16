//! Error types for Nova.
//!
//! Structural errors (graph, validation, missing parameter values) are raised
//! before any control-plane mutation. Everything else surfaces from the
//! control plane or the publisher and aborts the deployment without retry.

use std::time::Duration;

use thiserror::Error;

use crate::stack::StackStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("dependency '{component}' is not deployed yet (stack '{stack}' is {status})")]
    DependencyNotReady {
        component: String,
        stack: String,
        status: StackStatus,
    },

    #[error("stack '{stack}' is not in a valid state for deployment ({status})")]
    Conflict { stack: String, status: StackStatus },

    #[error("timed out after {waited:?} waiting for stack '{stack}'")]
    Timeout { stack: String, waited: Duration },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error("parameter '{parameter}' has no value")]
    MissingParameterValue { parameter: String },

    #[error("stack '{stack}' deployment failed ({status})")]
    DeploymentFailed { stack: String, status: StackStatus },

    #[error("build of component '{component}' failed: {message}")]
    Build { component: String, message: String },

    #[error("failed to publish template to '{key}': {message}")]
    Publish { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors in the component dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("could not find component '{name}'{}", required_by_suffix(.required_by))]
    ComponentNotFound {
        name: String,
        required_by: Option<String>,
    },
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(parent) => format!(" (dependency of '{parent}')"),
        None => String::new(),
    }
}

/// Resource and template validation failures. The first violation wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("resource '{resource}': mandatory property '{property}' is not set")]
    MissingProperty { resource: String, property: String },

    #[error("resource '{resource}' failed validation: {message}")]
    Resource { resource: String, message: String },

    #[error(
        "resource '{resource}': invalid value for '{property}', expected type '{expected}' got '{actual}'"
    )]
    TypeMismatch {
        resource: String,
        property: String,
        expected: String,
        actual: String,
    },

    #[error("resource '{resource}': value for '{property}' failed validation: {message}")]
    Property {
        resource: String,
        property: String,
        message: String,
    },

    #[error("resource '{resource}': property '{property}' is not defined for type '{resource_type}'")]
    UnknownProperty {
        resource: String,
        resource_type: String,
        property: String,
    },

    #[error("duplicate logical name '{0}' in template")]
    DuplicateName(String),
}

/// Failures reported by a control-plane backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlPlaneError {
    #[error("stack '{0}' does not exist")]
    StackNotFound(String),

    /// The submitted template and parameters match the live stack.
    #[error("no updates are to be performed on stack '{0}'")]
    NoChanges(String),

    #[error("control plane rejected request for stack '{stack}': {message}")]
    Rejected { stack: String, message: String },

    #[error("control plane unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Stack lifecycle control and deployment backends for Nova.
//!
//! Provides:
//! - The stack lifecycle controller (create, update, recreate, wait)
//! - A file-backed control plane and template publisher
//! - An in-memory control plane for tests and dry runs

pub mod lifecycle;
pub mod local;
pub mod memory;
pub mod publish;

pub use lifecycle::{
    COMPONENT_TAG, PROJECT_TAG, StackAction, StackLifecycle, StackMutation, WaitOptions, decide,
    ownership_tags,
};
pub use local::LocalControlPlane;
pub use memory::{ControlPlaneCall, InMemoryControlPlane};
pub use publish::LocalPublisher;

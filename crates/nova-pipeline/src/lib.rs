//! Deployment pipeline for Nova.
//!
//! Runs one component deployment through ten ordered stages: resolve
//! dependencies, gather their outputs, build and publish the template, then
//! drive the stack to a settled state and report its outputs.

pub mod context;
pub mod orchestrator;

pub use context::{DeploymentContext, DeploymentSummary};
pub use orchestrator::{
    DeployOptions, DeploymentOutcome, DeploymentPipeline, DeploymentReport, PipelineEvent, Stage,
    TemplateOutput,
};

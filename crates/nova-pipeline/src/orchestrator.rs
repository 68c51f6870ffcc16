//! Deployment pipeline - drives one component through the ten deploy stages.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use nova_core::graph::resolve_dependencies;
use nova_core::publish::template_key;
use nova_core::template::Template;
use nova_core::{
    BuildOptions, ComponentRef, ControlPlaneError, DependencyOutputs, Error, Project, Result,
    StackOutputs, StackStatus, TemplatePublisher,
};
use nova_deployer::lifecycle::bind_parameters;
use nova_deployer::{StackLifecycle, StackMutation, ownership_tags};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::context::{DeploymentContext, DeploymentSummary};

/// The ordered deployment stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialize,
    ResolveDependencies,
    FetchDependencyOutputs,
    Build,
    RenderTemplate,
    PublishTemplate,
    PrepareStack,
    ApplyStack,
    WaitForStack,
    CollectOutputs,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Initialize,
        Stage::ResolveDependencies,
        Stage::FetchDependencyOutputs,
        Stage::Build,
        Stage::RenderTemplate,
        Stage::PublishTemplate,
        Stage::PrepareStack,
        Stage::ApplyStack,
        Stage::WaitForStack,
        Stage::CollectOutputs,
    ];

    /// 1-based position in the pipeline.
    pub fn number(&self) -> usize {
        Self::ALL.iter().position(|s| s == self).map_or(0, |i| i + 1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initialize => "initialize",
            Stage::ResolveDependencies => "resolve-dependencies",
            Stage::FetchDependencyOutputs => "fetch-dependency-outputs",
            Stage::Build => "build",
            Stage::RenderTemplate => "render-template",
            Stage::PublishTemplate => "publish-template",
            Stage::PrepareStack => "prepare-stack",
            Stage::ApplyStack => "apply-stack",
            Stage::WaitForStack => "wait-for-stack",
            Stage::CollectOutputs => "collect-outputs",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted during a deployment.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    StageStarted { stage: Stage },
    StageCompleted { stage: Stage },
    StillWaiting { stack: String, status: StackStatus },
    Summary(DeploymentSummary),
}

/// Where a copy of the rendered template is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOutput {
    Stdout,
    File(PathBuf),
}

impl FromStr for TemplateOutput {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" => Err("template output path is empty".to_string()),
            "-" => Ok(TemplateOutput::Stdout),
            path => Ok(TemplateOutput::File(PathBuf::from(path))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Wait for the stack to settle before collecting outputs.
    pub wait: bool,
    /// Render and validate only; publish and mutate nothing.
    pub noop: bool,
    pub template_output: Option<TemplateOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    Deployed,
    DryRun,
    /// The build produced an empty template; nothing was published or changed.
    NothingToDeploy,
}

#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub outcome: DeploymentOutcome,
    pub context: DeploymentContext,
    /// Present only for [`DeploymentOutcome::Deployed`].
    pub summary: Option<DeploymentSummary>,
}

/// Deploys components of a project onto one control plane.
pub struct DeploymentPipeline {
    lifecycle: StackLifecycle,
    publisher: Arc<dyn TemplatePublisher>,
    key_prefix: String,
    events: Option<mpsc::Sender<PipelineEvent>>,
}

impl DeploymentPipeline {
    pub fn new(lifecycle: StackLifecycle, publisher: Arc<dyn TemplatePublisher>) -> Self {
        Self {
            lifecycle,
            publisher,
            key_prefix: String::new(),
            events: None,
        }
    }

    /// Prefix prepended to every published template key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Report progress on `tx` in addition to logging it.
    pub fn with_events(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn lifecycle(&self) -> &StackLifecycle {
        &self.lifecycle
    }

    /// Deploy `target` from `project`. Any stage failure stops the pipeline
    /// and is returned as is.
    pub async fn deploy(
        &self,
        project: &Project,
        target: &ComponentRef,
        options: &DeployOptions,
    ) -> Result<DeploymentReport> {
        let result = self.run(project, DeploymentContext::new(target.clone()), options).await;
        if let Err(e) = &result {
            error!(component = %target, error = %e, "Deployment failed");
        }
        result
    }

    /// Like [`deploy`](Self::deploy) with a caller-supplied context, so the
    /// deployment id and timestamp can be fixed.
    pub async fn run(
        &self,
        project: &Project,
        mut ctx: DeploymentContext,
        options: &DeployOptions,
    ) -> Result<DeploymentReport> {
        // 1. Initialize
        self.begin(&ctx, Stage::Initialize).await;
        if project.name != ctx.component.project {
            return Err(Error::Configuration(format!(
                "project '{}' does not exist (loaded project is '{}')",
                ctx.component.project, project.name
            )));
        }
        let component = project.component(&ctx.component.component)?;
        ctx.region = Some(component.region.clone());
        info!(
            component = %ctx.component,
            stack = %ctx.stack_name,
            deployment_id = %ctx.deployment_id,
            region = %component.region,
            "Starting deployment"
        );
        self.complete(Stage::Initialize).await;

        // 2. Resolve dependency order
        self.begin(&ctx, Stage::ResolveDependencies).await;
        ctx.dependencies = resolve_dependencies(project, &component.name)?;
        debug!(dependencies = ?ctx.dependencies, "Resolved dependency order");
        self.complete(Stage::ResolveDependencies).await;

        // 3. Fetch dependency outputs
        self.begin(&ctx, Stage::FetchDependencyOutputs).await;
        ctx.dependency_outputs = self.fetch_dependency_outputs(&ctx).await?;
        self.complete(Stage::FetchDependencyOutputs).await;

        // 4. Build
        self.begin(&ctx, Stage::Build).await;
        let build = component
            .build
            .invoke(
                &component.name,
                ctx.dependency_outputs.clone(),
                BuildOptions::default(),
            )
            .await?;
        self.complete(Stage::Build).await;

        // 5. Render template
        self.begin(&ctx, Stage::RenderTemplate).await;
        let mut template = Template::new();
        for item in build.resources {
            template.add_item(item);
        }
        for output in build.outputs {
            template.add_output(output);
        }
        for binding in &build.parameters {
            template.add_parameter(binding.parameter.clone());
        }
        if template.is_empty() {
            info!(component = %ctx.component, "Nothing to deploy");
            return Ok(DeploymentReport {
                outcome: DeploymentOutcome::NothingToDeploy,
                context: ctx,
                summary: None,
            });
        }
        let body = template.to_json()?;
        if let Some(output) = &options.template_output {
            write_template(output, &body).await?;
        }
        ctx.template_body = Some(body);
        self.complete(Stage::RenderTemplate).await;

        if options.noop {
            info!(component = %ctx.component, "No-op mode, skipping publish and stack changes");
            return Ok(DeploymentReport {
                outcome: DeploymentOutcome::DryRun,
                context: ctx,
                summary: None,
            });
        }

        ctx.parameters = bind_parameters(&build.parameters)?;

        // 6. Publish template
        self.begin(&ctx, Stage::PublishTemplate).await;
        let key = template_key(
            &self.key_prefix,
            &ctx.component,
            &ctx.deployment_id,
            &ctx.stack_name,
            &ctx.started_at,
        );
        let body = Bytes::from(ctx.template_body.clone().unwrap_or_default());
        let published = self.publisher.publish(&key, body).await?;
        info!(key = %published.key, url = %published.url, size = published.size, "Published template");
        ctx.published = Some(published);
        self.complete(Stage::PublishTemplate).await;

        // 7. Prepare stack
        self.begin(&ctx, Stage::PrepareStack).await;
        let status = self
            .lifecycle
            .prepare(&ctx.stack_name, self.still_waiting(&ctx.stack_name))
            .await?;
        ctx.initial_status = Some(status);
        self.complete(Stage::PrepareStack).await;

        // 8. Create or update
        self.begin(&ctx, Stage::ApplyStack).await;
        let template_url = ctx.template_url().unwrap_or_default().to_string();
        let mutation = self
            .lifecycle
            .apply(
                &ctx.stack_name,
                status,
                &template_url,
                ctx.parameters.clone(),
                ownership_tags(&ctx.component.project, &ctx.component.component),
            )
            .await?;
        info!(stack = %ctx.stack_name, stack_id = %mutation.stack_id(), "Stack mutation submitted");
        ctx.mutation = Some(mutation);
        self.complete(Stage::ApplyStack).await;

        // 9. Wait
        let unchanged = matches!(ctx.mutation, Some(StackMutation::Unchanged(_)));
        if options.wait && unchanged {
            debug!(stack = %ctx.stack_name, "Stack unchanged, nothing to wait for");
        } else if options.wait {
            self.begin(&ctx, Stage::WaitForStack).await;
            let mut report = self.still_waiting(&ctx.stack_name);
            let settled = self
                .lifecycle
                .wait_for_deployment(&ctx.stack_name, |status| {
                    info!(stack = %ctx.stack_name, status = %status, "Still waiting for stack to settle");
                    report(status);
                })
                .await?;
            ctx.final_status = Some(settled);
            self.complete(Stage::WaitForStack).await;
        }

        // 10. Collect outputs
        self.begin(&ctx, Stage::CollectOutputs).await;
        let description = self
            .lifecycle
            .control_plane()
            .describe_stack(&ctx.stack_name)
            .await?
            .ok_or_else(|| ControlPlaneError::StackNotFound(ctx.stack_name.clone()))?;
        ctx.final_status = Some(description.status);
        ctx.outputs = description.outputs;
        let summary = ctx.summary();
        info!(
            component = %ctx.component,
            stack_id = ?summary.stack_id,
            outputs = ctx.outputs.len(),
            "Deployment complete"
        );
        self.emit(PipelineEvent::Summary(summary.clone())).await;
        self.complete(Stage::CollectOutputs).await;

        Ok(DeploymentReport {
            outcome: DeploymentOutcome::Deployed,
            context: ctx,
            summary: Some(summary),
        })
    }

    /// Looks up every dependency concurrently. Dependencies are never
    /// deployed implicitly; one not in a valid complete state fails the run.
    async fn fetch_dependency_outputs(&self, ctx: &DeploymentContext) -> Result<DependencyOutputs> {
        let control_plane = self.lifecycle.control_plane();
        let lookups = ctx.dependencies.iter().map(|dependency| {
            let stack = ctx.component.sibling(dependency.as_str()).stack_name();
            async move {
                let description = control_plane.describe_stack(&stack).await?;
                let (status, outputs) = description
                    .map(|d| (d.status, d.outputs))
                    .unwrap_or((StackStatus::DoesNotExist, StackOutputs::new()));
                if !status.is_valid_complete() {
                    return Err(Error::DependencyNotReady {
                        component: dependency.clone(),
                        stack,
                        status,
                    });
                }
                debug!(dependency = %dependency, outputs = outputs.len(), "Fetched dependency outputs");
                Ok::<_, Error>((dependency.clone(), outputs))
            }
        });

        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    async fn begin(&self, ctx: &DeploymentContext, stage: Stage) {
        info!(
            deployment_id = %ctx.deployment_id,
            stage = %stage,
            step = stage.number(),
            "Stage started"
        );
        self.emit(PipelineEvent::StageStarted { stage }).await;
    }

    async fn complete(&self, stage: Stage) {
        debug!(stage = %stage, "Stage completed");
        self.emit(PipelineEvent::StageCompleted { stage }).await;
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.send(event).await {
                debug!(event = ?e.0, "Event receiver dropped");
            }
        }
    }

    /// Status callback for polling loops. Polling is synchronous, so events
    /// are offered without waiting and dropped when the channel is full.
    fn still_waiting(&self, stack: &str) -> impl FnMut(StackStatus) + use<> {
        let events = self.events.clone();
        let stack = stack.to_string();
        move |status| {
            if let Some(tx) = &events {
                let event = PipelineEvent::StillWaiting {
                    stack: stack.clone(),
                    status,
                };
                if let Err(e) = tx.try_send(event) {
                    debug!(stack = %stack, error = %e, "Dropped progress event");
                }
            }
        }
    }
}

async fn write_template(output: &TemplateOutput, body: &str) -> Result<()> {
    match output {
        TemplateOutput::Stdout => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(body.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        TemplateOutput::File(path) => {
            tokio::fs::write(path, body).await?;
            debug!(path = %path.display(), "Wrote template");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_numbers() {
        assert_eq!(Stage::Initialize.number(), 1);
        assert_eq!(Stage::PublishTemplate.number(), 6);
        assert_eq!(Stage::CollectOutputs.number(), 10);
        assert_eq!(Stage::FetchDependencyOutputs.to_string(), "fetch-dependency-outputs");
    }

    #[test]
    fn test_template_output_parse() {
        assert_eq!("-".parse::<TemplateOutput>().unwrap(), TemplateOutput::Stdout);
        assert_eq!(
            "out/t.json".parse::<TemplateOutput>().unwrap(),
            TemplateOutput::File(PathBuf::from("out/t.json"))
        );
        assert!("".parse::<TemplateOutput>().is_err());
    }
}

//! Deploy command.

use std::sync::Arc;

use anyhow::{Context, Result};
use nova_config::{ControlPlaneConfig, PublisherConfig, SystemConfig};
use nova_core::{ComponentRef, ControlPlane, TemplatePublisher};
use nova_deployer::{
    InMemoryControlPlane, LocalControlPlane, LocalPublisher, StackLifecycle, WaitOptions,
};
use nova_pipeline::{DeployOptions, DeploymentPipeline, DeploymentReport, PipelineEvent, Stage};
use tokio::sync::mpsc;

use super::Settings;
use crate::output;

pub async fn deploy(settings: &Settings, target: &str, options: &DeployOptions) -> Result<()> {
    let report = run(settings, target, options).await?;
    println!("{}", output::render_report(&report, settings.output_format())?);
    Ok(())
}

/// Deploy `target` with the configured backends, printing progress to stderr.
pub async fn run(
    settings: &Settings,
    target: &str,
    options: &DeployOptions,
) -> Result<DeploymentReport> {
    let target = ComponentRef::parse(target)?;
    let project = settings.load_project(&target.project)?.into_project();

    let (tx, rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_events(rx));

    let result = {
        let pipeline = pipeline(&settings.system).with_events(tx);
        pipeline.deploy(&project, &target, options).await
    };

    printer.await.context("Event printer task failed")?;
    result.with_context(|| format!("Failed to deploy {target}"))
}

fn pipeline(config: &SystemConfig) -> DeploymentPipeline {
    let control_plane: Arc<dyn ControlPlane> = match &config.control_plane {
        ControlPlaneConfig::Local { state } => Arc::new(LocalControlPlane::new(state)),
        ControlPlaneConfig::Memory => Arc::new(InMemoryControlPlane::new()),
    };
    let wait = WaitOptions {
        interval: config.wait.interval(),
        max_wait: config.wait.max_wait(),
    };

    let PublisherConfig::Local { root, key_prefix } = &config.publisher;
    let publisher: Arc<dyn TemplatePublisher> = Arc::new(LocalPublisher::new(root));

    DeploymentPipeline::new(
        StackLifecycle::with_wait_options(control_plane, wait),
        publisher,
    )
    .with_key_prefix(key_prefix.as_str())
}

async fn print_events(mut rx: mpsc::Receiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StageStarted { stage } => {
                eprintln!("▶ [{}/{}] {}", stage.number(), Stage::ALL.len(), stage);
            }
            PipelineEvent::StillWaiting { stack, status } => {
                eprintln!("  … waiting on {stack} ({status})");
            }
            PipelineEvent::StageCompleted { .. } | PipelineEvent::Summary(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use nova_pipeline::DeploymentOutcome;

    #[tokio::test]
    async fn test_deploy_with_local_backends() {
        let dir = tempfile::tempdir().unwrap();
        let settings = testing::settings(dir.path());
        let options = DeployOptions::default();

        let network = run(&settings, "shop/network", &options).await.unwrap();
        assert_eq!(network.outcome, DeploymentOutcome::Deployed);
        let summary = network.summary.unwrap();
        assert_eq!(summary.status.as_deref(), Some("CREATE_COMPLETE"));
        assert_eq!(summary.outputs["VpcId"], "shop-network-Vpc");
        assert!(dir.path().join("stacks.json").exists());

        run(&settings, "shop/database", &options).await.unwrap();
        let api = run(&settings, "shop/api", &options).await.unwrap();
        assert_eq!(api.context.dependencies, vec!["network", "database"]);
        assert_eq!(
            api.context.dependency_outputs["database"]["GroupId"],
            "shop-database-DbSg"
        );
        let summary = api.summary.unwrap();
        assert!(
            summary
                .template_url
                .as_deref()
                .is_some_and(|url| url.starts_with("file://"))
        );
    }

    #[tokio::test]
    async fn test_deploy_fails_on_undeployed_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let settings = testing::settings(dir.path());

        let err = run(&settings, "shop/api", &DeployOptions::default())
            .await
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("Failed to deploy shop/api"));
        assert!(message.contains("network"));
    }

    #[tokio::test]
    async fn test_noop_deploys_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = testing::settings(dir.path());
        let options = DeployOptions {
            noop: true,
            ..Default::default()
        };

        let report = run(&settings, "shop/network", &options).await.unwrap();
        assert_eq!(report.outcome, DeploymentOutcome::DryRun);
        assert!(report.summary.is_none());
        assert!(!dir.path().join("stacks.json").exists());
    }

    #[tokio::test]
    async fn test_rejects_malformed_reference() {
        let dir = tempfile::tempdir().unwrap();
        let settings = testing::settings(dir.path());
        assert!(run(&settings, "shop", &DeployOptions::default()).await.is_err());
        assert!(
            run(&settings, "shop/missing", &DeployOptions::default())
                .await
                .is_err()
        );
    }
}

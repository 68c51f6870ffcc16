//! End-to-end pipeline behaviour against the in-memory control plane.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nova_core::resource::{ResourceInstance, catalog};
use nova_core::template::{Output, Parameter};
use nova_core::{
    BuildFn, BuildResult, Component, ComponentRef, DependencyOutputs, Error, GraphError,
    ParameterBinding, Project, PublishedTemplate, StackOutputs, StackStatus, TemplatePublisher,
};
use nova_deployer::{ControlPlaneCall, InMemoryControlPlane, StackLifecycle, WaitOptions};
use nova_pipeline::{
    DeployOptions, DeploymentOutcome, DeploymentPipeline, PipelineEvent, Stage,
};
use serde_json::json;
use tokio::sync::mpsc;

/// Publisher that keeps every published body in memory.
#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    fn keys(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn bodies(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, b)| b.clone())
            .collect()
    }
}

#[async_trait]
impl TemplatePublisher for RecordingPublisher {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, key: &str, body: Bytes) -> nova_core::Result<PublishedTemplate> {
        let text = String::from_utf8_lossy(&body).into_owned();
        self.published
            .lock()
            .unwrap()
            .push((key.to_string(), text));
        Ok(PublishedTemplate {
            url: format!("memory://{key}"),
            key: key.to_string(),
            checksum: String::new(),
            size: body.len() as u64,
        })
    }
}

struct Harness {
    control_plane: Arc<InMemoryControlPlane>,
    publisher: Arc<RecordingPublisher>,
    pipeline: DeploymentPipeline,
}

fn harness() -> Harness {
    let control_plane = Arc::new(InMemoryControlPlane::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let lifecycle = StackLifecycle::with_wait_options(
        control_plane.clone(),
        WaitOptions {
            interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(120),
        },
    );
    let pipeline = DeploymentPipeline::new(lifecycle, publisher.clone()).with_key_prefix("nova/");
    Harness {
        control_plane,
        publisher,
        pipeline,
    }
}

fn outputs(pairs: &[(&str, &str)]) -> StackOutputs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn bucket(name: &str) -> ResourceInstance {
    let definition = catalog::lookup("AWS::S3::Bucket").unwrap();
    ResourceInstance::new(&definition, name, Vec::<(String, serde_json::Value)>::new())
}

/// Project where `a` depends on `b`. `a` records the outputs it was built with.
fn project_a_on_b(seen: Arc<Mutex<Option<DependencyOutputs>>>) -> Project {
    let build_a = BuildFn::sync(move |deps, _| {
        *seen.lock().unwrap() = Some(deps.clone());
        Ok(BuildResult::new()
            .with_resource(bucket("Assets"))
            .with_output(Output::new("bucket", json!({ "Ref": "Assets" }))))
    });
    Project::new("shop")
        .with_component(Component::new("a", "us-east-1", build_a).depends_on(["b"]))
        .with_component(Component::new(
            "b",
            "us-east-1",
            BuildFn::sync(|_, _| Ok(BuildResult::new().with_resource(bucket("Logs")))),
        ))
}

#[tokio::test]
async fn test_dependency_not_deployed_fails() {
    let h = harness();
    let project = project_a_on_b(Arc::default());

    let err = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "a"), &DeployOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::DependencyNotReady { ref component, status: StackStatus::DoesNotExist, .. }
            if component == "b"
    ));
    assert_eq!(h.control_plane.mutation_count().await, 0);
    assert!(h.publisher.keys().is_empty());
}

#[tokio::test]
async fn test_dependency_outputs_reach_build() {
    let h = harness();
    h.control_plane
        .insert_stack("shop-b", StackStatus::UpdateComplete, outputs(&[("url", "http://x")]))
        .await;
    h.control_plane
        .set_deploy_outputs("shop-a", outputs(&[("bucket", "shop-a-assets")]))
        .await;
    let seen = Arc::new(Mutex::new(None));
    let project = project_a_on_b(seen.clone());

    let report = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "a"), &DeployOptions::default())
        .await
        .unwrap();

    let mut expected = DependencyOutputs::new();
    expected.insert("b".to_string(), outputs(&[("url", "http://x")]));
    assert_eq!(seen.lock().unwrap().clone(), Some(expected));

    assert_eq!(report.outcome, DeploymentOutcome::Deployed);
    assert_eq!(report.context.dependencies, vec!["b"]);
    let summary = report.summary.unwrap();
    assert_eq!(summary.project, "shop");
    assert_eq!(summary.component, "a");
    assert_eq!(summary.outputs, outputs(&[("bucket", "shop-a-assets")]));
    assert!(summary.stack_id.is_some());

    let keys = h.publisher.keys();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with(&format!("nova/shop/a/{}/templates/shop-a-", summary.deployment_id)));

    let body: serde_json::Value = serde_json::from_str(&h.publisher.bodies()[0]).unwrap();
    assert_eq!(body["Resources"]["Assets"]["Type"], "AWS::S3::Bucket");
    assert_eq!(body["Outputs"]["bucket"]["Value"], json!({ "Ref": "Assets" }));

    let creates: Vec<_> = h
        .control_plane
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            ControlPlaneCall::Create(request) => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(creates.len(), 1);
    assert_eq!(creates[0].stack_name, "shop-a");
    assert_eq!(creates[0].template_url, format!("memory://{}", keys[0]));
    assert_eq!(creates[0].tags.len(), 2);
}

#[tokio::test]
async fn test_empty_build_deploys_nothing() {
    let h = harness();
    let project = Project::new("shop").with_component(Component::new(
        "empty",
        "us-east-1",
        BuildFn::sync(|_, _| Ok(BuildResult::new())),
    ));

    let report = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "empty"), &DeployOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outcome, DeploymentOutcome::NothingToDeploy);
    assert!(report.summary.is_none());
    assert_eq!(h.control_plane.mutation_count().await, 0);
    assert!(h.publisher.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stuck_rollback_is_deleted_then_created() {
    let h = harness();
    h.control_plane
        .insert_stack("shop-b", StackStatus::RollbackComplete, StackOutputs::new())
        .await;
    let project = project_a_on_b(Arc::default());

    let report = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "b"), &DeployOptions::default())
        .await
        .unwrap();
    assert_eq!(report.context.initial_status, Some(StackStatus::DoesNotExist));

    let mutations: Vec<ControlPlaneCall> = h
        .control_plane
        .calls()
        .await
        .into_iter()
        .filter(ControlPlaneCall::is_mutation)
        .collect();
    assert_eq!(mutations.len(), 2);
    assert_eq!(mutations[0], ControlPlaneCall::Delete("shop-b".to_string()));
    assert!(matches!(mutations[1], ControlPlaneCall::Create(_)));
}

#[tokio::test]
async fn test_busy_target_stack_conflicts() {
    let h = harness();
    h.control_plane
        .insert_stack("shop-b", StackStatus::UpdateInProgress, StackOutputs::new())
        .await;
    let project = project_a_on_b(Arc::default());

    let err = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "b"), &DeployOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Conflict { status: StackStatus::UpdateInProgress, .. }
    ));
    assert_eq!(h.control_plane.mutation_count().await, 0);
}

#[tokio::test]
async fn test_noop_renders_without_publishing() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template.json");
    let project = project_a_on_b(Arc::default());

    let options = DeployOptions {
        noop: true,
        template_output: Some(nova_pipeline::TemplateOutput::File(path.clone())),
        ..Default::default()
    };
    let report = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "b"), &options)
        .await
        .unwrap();

    assert_eq!(report.outcome, DeploymentOutcome::DryRun);
    assert!(h.publisher.keys().is_empty());
    assert_eq!(h.control_plane.mutation_count().await, 0);

    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(Some(written), report.context.template_body);
}

/// Project whose only component declares a `Stage` parameter with no value.
fn project_with_unvalued_parameter() -> Project {
    Project::new("shop").with_component(Component::new(
        "api",
        "us-east-1",
        BuildFn::sync(|_, _| {
            Ok(BuildResult::new()
                .with_resource(bucket("Assets"))
                .with_parameter(ParameterBinding {
                    parameter: Parameter::new("Stage"),
                    value: None,
                }))
        }),
    ))
}

#[tokio::test]
async fn test_parameter_without_value_fails_before_mutation() {
    let h = harness();
    let project = project_with_unvalued_parameter();

    let err = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "api"), &DeployOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MissingParameterValue { ref parameter } if parameter == "Stage"));
    assert!(h.publisher.keys().is_empty());
    assert_eq!(h.control_plane.mutation_count().await, 0);
}

#[tokio::test]
async fn test_noop_does_not_need_parameter_values() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("template.json");
    let project = project_with_unvalued_parameter();

    let options = DeployOptions {
        noop: true,
        template_output: Some(nova_pipeline::TemplateOutput::File(path.clone())),
        ..Default::default()
    };
    let report = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "api"), &options)
        .await
        .unwrap();

    assert_eq!(report.outcome, DeploymentOutcome::DryRun);
    assert!(report.context.parameters.is_empty());
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["Parameters"]["Stage"]["Type"], "String");
    assert_eq!(h.control_plane.mutation_count().await, 0);
}

#[tokio::test]
async fn test_cycle_fails_before_any_call() {
    let h = harness();
    let build = BuildFn::sync(|_, _| Ok(BuildResult::new()));
    let project = Project::new("shop")
        .with_component(Component::new("a", "r", build.clone()).depends_on(["b"]))
        .with_component(Component::new("b", "r", build).depends_on(["a"]));

    let err = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "a"), &DeployOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Graph(GraphError::Cycle { .. })));
    assert!(h.control_plane.calls().await.is_empty());
}

#[tokio::test]
async fn test_unknown_component_is_a_configuration_error() {
    let h = harness();
    let project = project_a_on_b(Arc::default());

    for target in [ComponentRef::new("shop", "ghost"), ComponentRef::new("other", "a")] {
        let err = h
            .pipeline
            .deploy(&project, &target, &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{target}: {err}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_reports_progress_and_final_status() {
    let control_plane = Arc::new(InMemoryControlPlane::new());
    control_plane
        .script(
            "shop-b",
            [
                StackStatus::CreateInProgress,
                StackStatus::CreateInProgress,
                StackStatus::CreateComplete,
            ],
        )
        .await;
    let (tx, mut rx) = mpsc::channel(100);
    let pipeline = DeploymentPipeline::new(
        StackLifecycle::new(control_plane.clone()),
        Arc::new(RecordingPublisher::default()),
    )
    .with_events(tx);
    let project = project_a_on_b(Arc::default());

    let options = DeployOptions {
        wait: true,
        ..Default::default()
    };
    let report = pipeline
        .deploy(&project, &ComponentRef::new("shop", "b"), &options)
        .await
        .unwrap();
    assert_eq!(report.context.final_status, Some(StackStatus::CreateComplete));
    drop(pipeline);

    let mut started = Vec::new();
    let mut still_waiting = 0;
    let mut summaries = 0;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::StageStarted { stage } => started.push(stage),
            PipelineEvent::StillWaiting { .. } => still_waiting += 1,
            PipelineEvent::Summary(_) => summaries += 1,
            PipelineEvent::StageCompleted { .. } => {}
        }
    }
    assert_eq!(started, Stage::ALL.to_vec());
    assert_eq!(still_waiting, 2);
    assert_eq!(summaries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_deployment_aborts() {
    let h = harness();
    h.control_plane
        .script(
            "shop-b",
            [StackStatus::CreateInProgress, StackStatus::RollbackInProgress],
        )
        .await;
    let project = project_a_on_b(Arc::default());

    let options = DeployOptions {
        wait: true,
        ..Default::default()
    };
    let err = h
        .pipeline
        .deploy(&project, &ComponentRef::new("shop", "b"), &options)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DeploymentFailed { status: StackStatus::RollbackInProgress, .. }
    ));
}

#[tokio::test]
async fn test_redeploy_without_changes_keeps_stack_id() {
    let h = harness();
    let project = project_a_on_b(Arc::default());
    let target = ComponentRef::new("shop", "b");

    let first = h
        .pipeline
        .deploy(&project, &target, &DeployOptions::default())
        .await
        .unwrap();
    let second = h
        .pipeline
        .deploy(&project, &target, &DeployOptions::default())
        .await
        .unwrap();

    // Each deployment publishes under a fresh key, so the update goes through.
    assert_eq!(first.summary.unwrap().stack_id, second.summary.unwrap().stack_id);
    let updates = h
        .control_plane
        .calls()
        .await
        .into_iter()
        .filter(|c| matches!(c, ControlPlaneCall::Update(_)))
        .count();
    assert_eq!(updates, 1);
}

/// Publisher that hands out the same URL for every key.
struct FixedUrlPublisher;

#[async_trait]
impl TemplatePublisher for FixedUrlPublisher {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn publish(&self, key: &str, body: Bytes) -> nova_core::Result<PublishedTemplate> {
        Ok(PublishedTemplate {
            url: "memory://fixed".to_string(),
            key: key.to_string(),
            checksum: String::new(),
            size: body.len() as u64,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_stack_skips_wait() {
    let control_plane = Arc::new(InMemoryControlPlane::new());
    let project = project_a_on_b(Arc::default());
    let target = ComponentRef::new("shop", "b");
    let options = DeployOptions {
        wait: true,
        ..Default::default()
    };

    let first = DeploymentPipeline::new(
        StackLifecycle::new(control_plane.clone()),
        Arc::new(FixedUrlPublisher),
    );
    first.deploy(&project, &target, &options).await.unwrap();

    let (tx, mut rx) = mpsc::channel(100);
    let second = DeploymentPipeline::new(
        StackLifecycle::new(control_plane.clone()),
        Arc::new(FixedUrlPublisher),
    )
    .with_events(tx);
    let report = second.deploy(&project, &target, &options).await.unwrap();
    assert_eq!(report.outcome, DeploymentOutcome::Deployed);
    assert_eq!(report.context.final_status, Some(StackStatus::CreateComplete));
    drop(second);

    let mut started = Vec::new();
    while let Some(event) = rx.recv().await {
        if let PipelineEvent::StageStarted { stage } = event {
            started.push(stage);
        }
    }
    assert!(!started.contains(&Stage::WaitForStack));
    assert!(started.contains(&Stage::CollectOutputs));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_rollback_deletion_reports_progress() {
    let control_plane = Arc::new(InMemoryControlPlane::new());
    control_plane
        .insert_stack("shop-b", StackStatus::RollbackComplete, StackOutputs::new())
        .await;
    control_plane
        .script(
            "shop-b",
            [
                StackStatus::RollbackComplete,
                StackStatus::DeleteInProgress,
                StackStatus::DoesNotExist,
            ],
        )
        .await;
    let (tx, mut rx) = mpsc::channel(100);
    let pipeline = DeploymentPipeline::new(
        StackLifecycle::new(control_plane.clone()),
        Arc::new(RecordingPublisher::default()),
    )
    .with_events(tx);
    let project = project_a_on_b(Arc::default());

    pipeline
        .deploy(&project, &ComponentRef::new("shop", "b"), &DeployOptions::default())
        .await
        .unwrap();
    drop(pipeline);

    let mut waiting = Vec::new();
    while let Some(event) = rx.recv().await {
        if let PipelineEvent::StillWaiting { stack, status } = event {
            waiting.push((stack, status));
        }
    }
    assert_eq!(
        waiting,
        vec![("shop-b".to_string(), StackStatus::DeleteInProgress)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_deploy_survives_dropped_event_receiver() {
    let control_plane = Arc::new(InMemoryControlPlane::new());
    control_plane
        .script(
            "shop-b",
            [StackStatus::CreateInProgress, StackStatus::CreateComplete],
        )
        .await;
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let pipeline = DeploymentPipeline::new(
        StackLifecycle::new(control_plane.clone()),
        Arc::new(RecordingPublisher::default()),
    )
    .with_events(tx);
    let project = project_a_on_b(Arc::default());

    let options = DeployOptions {
        wait: true,
        ..Default::default()
    };
    let report = pipeline
        .deploy(&project, &ComponentRef::new("shop", "b"), &options)
        .await
        .unwrap();
    assert_eq!(report.outcome, DeploymentOutcome::Deployed);
    assert_eq!(report.context.final_status, Some(StackStatus::CreateComplete));
}

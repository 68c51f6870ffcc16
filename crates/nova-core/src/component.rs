//! Components, projects and the build function contract.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::BoxFuture;

use crate::control_plane::StackOutputs;
use crate::graph::ComponentGraph;
use crate::template::{Output, Parameter, TemplateItem};
use crate::{Error, Result};

/// Outputs of every resolved dependency, keyed by component name.
pub type DependencyOutputs = BTreeMap<String, StackOutputs>;

/// Reference to a component within a project, written `<project>/<component>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentRef {
    pub project: String,
    pub component: String,
}

impl ComponentRef {
    pub fn new(project: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            component: component.into(),
        }
    }

    pub fn parse(reference: &str) -> Result<Self> {
        let (project, component) = reference.split_once('/').ok_or_else(|| {
            Error::Configuration(format!(
                "invalid reference '{reference}': expected <project>/<component>"
            ))
        })?;
        if project.is_empty() {
            return Err(Error::Configuration(format!(
                "invalid reference '{reference}': project was not specified"
            )));
        }
        if component.is_empty() || component.contains('/') {
            return Err(Error::Configuration(format!(
                "invalid reference '{reference}': component was not specified"
            )));
        }
        Ok(Self::new(project, component))
    }

    /// Deterministic control-plane stack name for this component.
    pub fn stack_name(&self) -> String {
        let raw = format!("{}-{}", self.project, self.component);
        let sanitized: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        if sanitized.starts_with(|c: char| c.is_ascii_alphabetic()) {
            sanitized
        } else {
            format!("nova-{sanitized}")
        }
    }

    /// Reference to another component of the same project.
    pub fn sibling(&self, component: impl Into<String>) -> Self {
        Self::new(self.project.clone(), component)
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.component)
    }
}

/// A parameter declaration with the value it is deployed with.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBinding {
    pub parameter: Parameter,
    pub value: Option<String>,
}

impl ParameterBinding {
    pub fn new(parameter: Parameter, value: impl Into<String>) -> Self {
        Self {
            parameter,
            value: Some(value.into()),
        }
    }
}

/// What a component's build function produces.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub resources: Vec<TemplateItem>,
    pub outputs: Vec<Output>,
    pub parameters: Vec<ParameterBinding>,
}

impl BuildResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, item: impl Into<TemplateItem>) -> Self {
        self.resources.push(item.into());
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_parameter(mut self, binding: ParameterBinding) -> Self {
        self.parameters.push(binding);
        self
    }
}

/// Options handed to build functions. Reserved, currently empty.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {}

/// Completion handle for callback-style builds.
pub struct BuildCallback {
    tx: oneshot::Sender<Result<BuildResult>>,
}

impl BuildCallback {
    pub fn done(self, result: Result<BuildResult>) {
        // The receiver is only gone if the deployment was dropped.
        let _ = self.tx.send(result);
    }
}

type SyncBuild = dyn Fn(&DependencyOutputs, &BuildOptions) -> Result<BuildResult> + Send + Sync;
type CallbackBuild = dyn Fn(&DependencyOutputs, &BuildOptions, BuildCallback) + Send + Sync;
type DeferredBuild =
    dyn Fn(DependencyOutputs, BuildOptions) -> BoxFuture<'static, Result<BuildResult>> + Send + Sync;

/// A component's build function in one of three calling conventions.
/// [`BuildFn::invoke`] adapts all of them to a single future.
#[derive(Clone)]
pub enum BuildFn {
    /// Returns the result directly.
    Sync(Arc<SyncBuild>),
    /// Reports the result through a [`BuildCallback`], possibly later.
    Callback(Arc<CallbackBuild>),
    /// Returns a future resolving to the result.
    Deferred(Arc<DeferredBuild>),
}

impl BuildFn {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&DependencyOutputs, &BuildOptions) -> Result<BuildResult> + Send + Sync + 'static,
    {
        BuildFn::Sync(Arc::new(f))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&DependencyOutputs, &BuildOptions, BuildCallback) + Send + Sync + 'static,
    {
        BuildFn::Callback(Arc::new(f))
    }

    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(DependencyOutputs, BuildOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BuildResult>> + Send + 'static,
    {
        BuildFn::Deferred(Arc::new(move |deps, options| f(deps, options).boxed()))
    }

    /// Runs the build for `component`, whichever convention it uses.
    pub fn invoke(
        &self,
        component: &str,
        dependencies: DependencyOutputs,
        options: BuildOptions,
    ) -> BoxFuture<'static, Result<BuildResult>> {
        match self {
            BuildFn::Sync(f) => futures::future::ready(f(&dependencies, &options)).boxed(),
            BuildFn::Callback(f) => {
                let (tx, rx) = oneshot::channel();
                f(&dependencies, &options, BuildCallback { tx });
                let component = component.to_string();
                async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(Error::Build {
                            component,
                            message: "build callback was dropped without a result".to_string(),
                        })
                    })
                }
                .boxed()
            }
            BuildFn::Deferred(f) => f(dependencies, options),
        }
    }
}

impl fmt::Debug for BuildFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            BuildFn::Sync(_) => "sync",
            BuildFn::Callback(_) => "callback",
            BuildFn::Deferred(_) => "deferred",
        };
        write!(f, "BuildFn::{kind}")
    }
}

/// A deployable unit of infrastructure.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub region: String,
    pub dependencies: Vec<String>,
    pub build: BuildFn,
}

impl Component {
    pub fn new(name: impl Into<String>, region: impl Into<String>, build: BuildFn) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            dependencies: Vec::new(),
            build,
        }
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }
}

/// A named set of components.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub name: String,
    pub components: Vec<Component>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn find_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Looks up a component, reporting a configuration error when absent.
    pub fn component(&self, name: &str) -> Result<&Component> {
        self.find_component(name).ok_or_else(|| {
            Error::Configuration(format!(
                "component '{name}' does not exist in project '{}'",
                self.name
            ))
        })
    }
}

impl ComponentGraph for Project {
    fn dependencies_of(&self, component: &str) -> Option<&[String]> {
        self.find_component(component)
            .map(|c| c.dependencies.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Output;
    use serde_json::json;

    #[test]
    fn test_parse_ref() {
        let r = ComponentRef::parse("shop/network").unwrap();
        assert_eq!(r.project, "shop");
        assert_eq!(r.component, "network");
        assert_eq!(r.to_string(), "shop/network");

        assert!(ComponentRef::parse("shop").is_err());
        assert!(ComponentRef::parse("shop/").is_err());
        assert!(ComponentRef::parse("/network").is_err());
        assert!(ComponentRef::parse("a/b/c").is_err());
    }

    #[test]
    fn test_stack_name_is_deterministic_and_sanitized() {
        let r = ComponentRef::new("shop", "web_api");
        assert_eq!(r.stack_name(), "shop-web-api");
        assert_eq!(r.stack_name(), r.clone().stack_name());
        assert_eq!(ComponentRef::new("1st", "db").stack_name(), "nova-1st-db");
    }

    fn outputs_result(deps: &DependencyOutputs) -> Result<BuildResult> {
        let url = deps
            .get("b")
            .and_then(|o| o.get("url"))
            .cloned()
            .unwrap_or_default();
        Ok(BuildResult::new().with_output(Output::new("Upstream", json!(url))))
    }

    fn deps() -> DependencyOutputs {
        let mut b = StackOutputs::new();
        b.insert("url".to_string(), "http://x".to_string());
        let mut deps = DependencyOutputs::new();
        deps.insert("b".to_string(), b);
        deps
    }

    #[tokio::test]
    async fn test_all_calling_conventions_resolve_the_same() {
        let sync = BuildFn::sync(|deps, _| outputs_result(deps));
        let callback = BuildFn::callback(|deps, _, done| {
            let result = outputs_result(deps);
            std::thread::spawn(move || done.done(result));
        });
        let deferred = BuildFn::deferred(|deps, _| async move {
            tokio::task::yield_now().await;
            outputs_result(&deps)
        });

        for build in [sync, callback, deferred] {
            let result = build
                .invoke("a", deps(), BuildOptions::default())
                .await
                .unwrap();
            assert_eq!(result.outputs[0].value, json!("http://x"), "{build:?}");
        }
    }

    #[tokio::test]
    async fn test_dropped_callback_is_a_build_error() {
        let build = BuildFn::callback(|_, _, done| drop(done));
        let err = build
            .invoke("a", DependencyOutputs::new(), BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Build { component, .. } if component == "a"));
    }

    #[test]
    fn test_project_lookup() {
        let project = Project::new("shop").with_component(
            Component::new("a", "us-east-1", BuildFn::sync(|_, _| Ok(BuildResult::new())))
                .depends_on(["b"]),
        );
        assert_eq!(project.dependencies_of("a"), Some(&["b".to_string()][..]));
        assert!(project.dependencies_of("b").is_none());
        assert!(matches!(project.component("b"), Err(Error::Configuration(_))));
    }
}

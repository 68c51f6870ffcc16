//! Project file parsing.
//!
//! A project file declares components and, for each, the resources, outputs
//! and parameters its build produces. The parsed [`ProjectSpec`] converts to
//! a [`Project`] whose build functions substitute dependency outputs into the
//! declared values.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

use kdl::{KdlDocument, KdlNode, KdlValue};
use nova_core::resource::{ResourceDefinition, ResourceInstance, catalog};
use nova_core::template::{Output, Parameter};
use nova_core::{
    BuildFn, BuildResult, Component, DependencyOutputs, Error, ParameterBinding, Project,
};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::variables::{OutputContext, OutputReference, find_value_references};
use crate::{ConfigError, ConfigResult};

/// A parsed project file.
#[derive(Debug, Clone)]
pub struct ProjectSpec {
    pub name: String,
    pub components: Vec<ComponentSpec>,
}

/// A declaratively defined component.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub region: String,
    pub depends_on: Vec<String>,
    pub resources: Vec<ResourceSpec>,
    pub outputs: Vec<OutputSpec>,
    pub parameters: Vec<ParameterSpec>,
}

#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub name: String,
    pub definition: Arc<ResourceDefinition>,
    pub properties: Vec<(String, Value)>,
    pub depends_on: Vec<String>,
    pub deletion_policy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    pub value: Value,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub parameter: Parameter,
    /// Value the stack is deployed with; may reference dependency outputs.
    pub value: Option<String>,
}

/// Parse a project from KDL text.
pub fn parse_project(kdl: &str) -> ConfigResult<ProjectSpec> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut components: Vec<ComponentSpec> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;
            }
            "component" => {
                let component = parse_component(node)?;
                if components.iter().any(|c| c.name == component.name) {
                    return Err(ConfigError::Duplicate(format!(
                        "component '{}'",
                        component.name
                    )));
                }
                components.push(component);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if name.is_empty() {
        return Err(ConfigError::MissingField("project name".to_string()));
    }

    Ok(ProjectSpec { name, components })
}

/// Read `<projects_dir>/<name>.kdl` and check it declares project `name`.
pub fn load_project(projects_dir: &Path, name: &str) -> ConfigResult<ProjectSpec> {
    let path = projects_dir.join(format!("{name}.kdl"));
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::ProjectNotFound(path));
        }
        Err(e) => return Err(e.into()),
    };

    let spec = parse_project(&content)?;
    if spec.name != name {
        return Err(ConfigError::InvalidValue {
            field: "project name".to_string(),
            message: format!(
                "{} declares project '{}', expected '{name}'",
                path.display(),
                spec.name
            ),
        });
    }
    debug!(project = %name, path = %path.display(), components = spec.components.len(), "Loaded project");
    Ok(spec)
}

impl ProjectSpec {
    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Checks that every `${dep.Output}` reference names a declared dependency.
    pub fn check_references(&self) -> ConfigResult<()> {
        for component in &self.components {
            for reference in component.references() {
                if !component.depends_on.contains(&reference.dependency) {
                    return Err(ConfigError::InvalidReference(format!(
                        "component '{}' references {reference} but does not depend on '{}'",
                        component.name, reference.dependency
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn into_project(self) -> Project {
        self.components
            .into_iter()
            .fold(Project::new(self.name), |project, spec| {
                project.with_component(spec.into_component())
            })
    }
}

impl ComponentSpec {
    /// Every dependency output reference in this component, deduplicated.
    pub fn references(&self) -> BTreeSet<OutputReference> {
        let properties = self
            .resources
            .iter()
            .flat_map(|r| r.properties.iter().map(|(_, v)| v));
        let outputs = self.outputs.iter().map(|o| &o.value);

        let mut refs: BTreeSet<OutputReference> = properties
            .chain(outputs)
            .flat_map(find_value_references)
            .collect();
        for parameter in &self.parameters {
            if let Some(value) = &parameter.value {
                refs.extend(find_value_references(&Value::String(value.clone())));
            }
        }
        refs
    }

    /// Produces the build result for the given dependency outputs.
    pub fn build(&self, dependencies: &DependencyOutputs) -> nova_core::Result<BuildResult> {
        let ctx = OutputContext::new(dependencies);
        let unresolved = |reference: OutputReference| Error::Build {
            component: self.name.clone(),
            message: format!("unresolved reference {reference}"),
        };

        let mut result = BuildResult::new();

        for resource in &self.resources {
            let properties = resource
                .properties
                .iter()
                .map(|(key, value)| Ok((key.clone(), ctx.interpolate_value(value)?)))
                .collect::<Result<Vec<_>, OutputReference>>()
                .map_err(unresolved)?;

            let mut instance = ResourceInstance::new(&resource.definition, &resource.name, properties);
            if !resource.depends_on.is_empty() {
                instance = instance.depends_on(resource.depends_on.iter().cloned());
            }
            if let Some(policy) = &resource.deletion_policy {
                instance = instance.with_attribute("DeletionPolicy", json!(policy));
            }
            result = result.with_resource(instance);
        }

        for output in &self.outputs {
            let value = ctx.interpolate_value(&output.value).map_err(unresolved)?;
            let mut declared = Output::new(&output.name, value);
            declared.description = output.description.clone();
            declared.export_name = output.export_name.clone();
            result = result.with_output(declared);
        }

        for parameter in &self.parameters {
            let value = parameter
                .value
                .as_deref()
                .map(|v| ctx.interpolate(v))
                .transpose()
                .map_err(unresolved)?;
            result.parameters.push(ParameterBinding {
                parameter: parameter.parameter.clone(),
                value,
            });
        }

        Ok(result)
    }

    pub fn into_component(self) -> Component {
        let name = self.name.clone();
        let region = self.region.clone();
        let depends_on = self.depends_on.clone();
        let spec = Arc::new(self);
        Component::new(
            name,
            region,
            BuildFn::sync(move |deps, _options| spec.build(deps)),
        )
        .depends_on(depends_on)
    }
}

fn parse_component(node: &KdlNode) -> ConfigResult<ComponentSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("component name".to_string()))?;
    let region = get_string_prop(node, "region").ok_or_else(|| {
        ConfigError::MissingField(format!("region for component '{name}'"))
    })?;
    let depends_on = get_string_list_prop(node, "depends-on");

    let mut resources: Vec<ResourceSpec> = Vec::new();
    let mut outputs: Vec<OutputSpec> = Vec::new();
    let mut parameters: Vec<ParameterSpec> = Vec::new();
    let mut logical_names = HashSet::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "resource" => {
                    let resource = parse_resource(child)?;
                    if !logical_names.insert(resource.name.clone()) {
                        return Err(ConfigError::Duplicate(format!(
                            "'{}' in component '{name}'",
                            resource.name
                        )));
                    }
                    resources.push(resource);
                }
                "parameter" => {
                    let parameter = parse_parameter(child)?;
                    if !logical_names.insert(parameter.parameter.name.clone()) {
                        return Err(ConfigError::Duplicate(format!(
                            "'{}' in component '{name}'",
                            parameter.parameter.name
                        )));
                    }
                    parameters.push(parameter);
                }
                "output" => {
                    let output = parse_output(child)?;
                    if outputs.iter().any(|o| o.name == output.name) {
                        return Err(ConfigError::Duplicate(format!(
                            "output '{}' in component '{name}'",
                            output.name
                        )));
                    }
                    outputs.push(output);
                }
                _ => {}
            }
        }
    }

    Ok(ComponentSpec {
        name,
        region,
        depends_on,
        resources,
        outputs,
        parameters,
    })
}

fn parse_resource(node: &KdlNode) -> ConfigResult<ResourceSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("resource name".to_string()))?;
    let resource_type = get_string_prop(node, "type")
        .ok_or_else(|| ConfigError::MissingField(format!("type for resource '{name}'")))?;
    let definition =
        catalog::lookup(&resource_type).ok_or_else(|| ConfigError::UnknownResourceType {
            resource: name.clone(),
            resource_type: resource_type.clone(),
        })?;

    let mut properties: Vec<(String, Value)> = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "property" {
                continue;
            }
            let key = get_first_string_arg(child).ok_or_else(|| {
                ConfigError::MissingField(format!("property name in resource '{name}'"))
            })?;
            if properties.iter().any(|(k, _)| *k == key) {
                return Err(ConfigError::Duplicate(format!(
                    "property '{key}' in resource '{name}'"
                )));
            }
            let value = parse_value(child, 1, &format!("{name}.{key}"))?;
            properties.push((key, value));
        }
    }

    Ok(ResourceSpec {
        depends_on: get_string_list_prop(node, "depends-on"),
        deletion_policy: get_string_prop(node, "deletion-policy"),
        name,
        definition,
        properties,
    })
}

fn parse_output(node: &KdlNode) -> ConfigResult<OutputSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("output name".to_string()))?;
    let value = parse_value(node, 1, &format!("output '{name}'"))?;
    Ok(OutputSpec {
        description: get_string_prop(node, "description"),
        export_name: get_string_prop(node, "export"),
        name,
        value,
    })
}

fn parse_parameter(node: &KdlNode) -> ConfigResult<ParameterSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("parameter name".to_string()))?;

    let mut parameter = Parameter::new(name);
    if let Some(param_type) = get_string_prop(node, "type") {
        parameter = parameter.with_type(param_type);
    }
    parameter.description = get_string_prop(node, "description");
    parameter.default = get_string_prop(node, "default");
    parameter.allowed_values = get_string_list_prop(node, "allowed-values");
    parameter.no_echo = get_bool_prop(node, "no-echo").unwrap_or(false);

    Ok(ParameterSpec {
        parameter,
        value: get_string_prop(node, "value"),
    })
}

/// Reads a value from `ref=`, `get-att=`, `json=`, positional arguments
/// after the first `skip`, or child nodes, in that order of precedence.
fn parse_value(node: &KdlNode, skip: usize, field: &str) -> ConfigResult<Value> {
    if let Some(target) = get_string_prop(node, "ref") {
        return Ok(json!({ "Ref": target }));
    }
    if let Some(att) = get_string_prop(node, "get-att") {
        let (resource, attribute) = att.split_once('.').ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("get-att must be <Resource>.<Attribute>, got '{att}'"),
        })?;
        return Ok(json!({ "Fn::GetAtt": [resource, attribute] }));
    }
    if let Some(raw) = get_string_prop(node, "json") {
        return serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("invalid JSON: {e}"),
        });
    }

    let mut args: Vec<Value> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .skip(skip)
        .map(|e| kdl_to_json(e.value()))
        .collect();

    match args.len() {
        0 => {}
        1 => return Ok(args.remove(0)),
        _ => return Ok(Value::Array(args)),
    }

    match node.children() {
        Some(children) => {
            let mut object = Map::new();
            for child in children.nodes() {
                let key = child.name().value().to_string();
                let value = parse_value(child, 0, &format!("{field}.{key}"))?;
                object.insert(key, value);
            }
            Ok(Value::Object(object))
        }
        None => Err(ConfigError::MissingField(format!("value for {field}"))),
    }
}

fn kdl_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

/// Collects a list from repeated properties (`depends-on="a" depends-on="b"`)
/// or from a child node of the same name (`depends-on "a" "b"`).
fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let result: Vec<String> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_some_and(|n| n.value() == name))
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect();

    if !result.is_empty() {
        return result;
    }

    node.children()
        .and_then(|children| children.nodes().iter().find(|c| c.name().value() == name))
        .map(get_all_string_args)
        .unwrap_or_default()
}

//! Template aggregation and document serialization.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::Result;
use crate::error::ValidationError;
use crate::resource::ResourceInstance;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A stack output declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: Value,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

impl Output {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
            export_name: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn to_document(&self) -> Value {
        let mut object = Map::new();
        object.insert("Value".to_string(), self.value.clone());
        if let Some(description) = &self.description {
            object.insert("Description".to_string(), json!(description));
        }
        if let Some(export) = &self.export_name {
            object.insert("Export".to_string(), json!({ "Name": export }));
        }
        Value::Object(object)
    }
}

/// A stack parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Control-plane parameter type, `String` unless set otherwise.
    pub param_type: String,
    pub description: Option<String>,
    pub default: Option<String>,
    pub allowed_values: Vec<String>,
    pub no_echo: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: "String".to_string(),
            description: None,
            default: None,
            allowed_values: Vec::new(),
            no_echo: false,
        }
    }

    pub fn with_type(mut self, param_type: impl Into<String>) -> Self {
        self.param_type = param_type.into();
        self
    }

    fn to_document(&self) -> Value {
        let mut object = Map::new();
        object.insert("Type".to_string(), json!(self.param_type));
        if let Some(description) = &self.description {
            object.insert("Description".to_string(), json!(description));
        }
        if let Some(default) = &self.default {
            object.insert("Default".to_string(), json!(default));
        }
        if !self.allowed_values.is_empty() {
            object.insert("AllowedValues".to_string(), json!(self.allowed_values));
        }
        if self.no_echo {
            object.insert("NoEcho".to_string(), json!(true));
        }
        Value::Object(object)
    }
}

/// Something a build can contribute to a template's resources.
#[derive(Debug, Clone)]
pub enum TemplateItem {
    Resource(ResourceInstance),
    /// A reusable group of resources, flattened into the parent.
    Template(Template),
}

impl From<ResourceInstance> for TemplateItem {
    fn from(resource: ResourceInstance) -> Self {
        TemplateItem::Resource(resource)
    }
}

impl From<Template> for TemplateItem {
    fn from(template: Template) -> Self {
        TemplateItem::Template(template)
    }
}

/// An ordered collection of resources, outputs and parameters.
#[derive(Debug, Clone, Default)]
pub struct Template {
    description: Option<String>,
    resources: Vec<ResourceInstance>,
    outputs: Vec<Output>,
    parameters: Vec<Parameter>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_resource(&mut self, resource: ResourceInstance) -> &mut Self {
        self.resources.push(resource);
        self
    }

    /// Adds a resource, or every resource, output and parameter of a nested
    /// template. Nested templates already hold only flat resources.
    pub fn add_item(&mut self, item: impl Into<TemplateItem>) -> &mut Self {
        match item.into() {
            TemplateItem::Resource(resource) => {
                self.resources.push(resource);
            }
            TemplateItem::Template(nested) => {
                self.resources.extend(nested.resources);
                self.outputs.extend(nested.outputs);
                self.parameters.extend(nested.parameters);
            }
        }
        self
    }

    pub fn add_output(&mut self, output: Output) -> &mut Self {
        self.outputs.push(output);
        self
    }

    pub fn add_parameter(&mut self, parameter: Parameter) -> &mut Self {
        self.parameters.push(parameter);
        self
    }

    pub fn resources(&self) -> &[ResourceInstance] {
        &self.resources
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// No resources, outputs or parameters: there is nothing to deploy.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.outputs.is_empty() && self.parameters.is_empty()
    }

    /// Validates every resource and renders the whole document.
    pub fn to_document(&self) -> std::result::Result<Value, ValidationError> {
        self.check_names()?;

        let mut resources = Map::new();
        for resource in &self.resources {
            resources.insert(resource.name().to_string(), resource.serialize()?);
        }

        let mut document = Map::new();
        document.insert(
            "AWSTemplateFormatVersion".to_string(),
            json!(TEMPLATE_FORMAT_VERSION),
        );
        if let Some(description) = &self.description {
            document.insert("Description".to_string(), json!(description));
        }
        if !self.parameters.is_empty() {
            let parameters: Map<String, Value> = self
                .parameters
                .iter()
                .map(|p| (p.name.clone(), p.to_document()))
                .collect();
            document.insert("Parameters".to_string(), Value::Object(parameters));
        }
        document.insert("Resources".to_string(), Value::Object(resources));
        if !self.outputs.is_empty() {
            let outputs: Map<String, Value> = self
                .outputs
                .iter()
                .map(|o| (o.name.clone(), o.to_document()))
                .collect();
            document.insert("Outputs".to_string(), Value::Object(outputs));
        }

        Ok(Value::Object(document))
    }

    pub fn to_json(&self) -> Result<String> {
        let document = self.to_document()?;
        Ok(serde_json::to_string_pretty(&document)?)
    }

    // Resources and parameters share one logical-id namespace; outputs have their own.
    fn check_names(&self) -> std::result::Result<(), ValidationError> {
        let mut logical_ids = BTreeSet::new();
        let ids = self
            .resources
            .iter()
            .map(ResourceInstance::name)
            .chain(self.parameters.iter().map(|p| p.name.as_str()));
        for id in ids {
            if !logical_ids.insert(id) {
                return Err(ValidationError::DuplicateName(id.to_string()));
            }
        }

        let mut output_names = BTreeSet::new();
        for output in &self.outputs {
            if !output_names.insert(output.name.as_str()) {
                return Err(ValidationError::DuplicateName(output.name.clone()));
            }
        }
        Ok(())
    }
}

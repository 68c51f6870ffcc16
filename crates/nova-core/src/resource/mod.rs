//! Declarative resource definitions and instances.
//!
//! A [`ResourceDefinition`] is plain data: a type tag plus a property schema.
//! Every resource kind shares the single [`ResourceInstance`] representation,
//! which binds a name, property values and attributes to a shared definition.

pub mod catalog;

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::error::ValidationError;

/// Custom check on a single property. Receives the whole resource so that
/// checks can relate several properties. Returns a message on failure.
pub type PropertyValidator = Arc<dyn Fn(&ResourceInstance) -> Option<String> + Send + Sync>;

/// Whole-resource check run after the required-property pass.
pub type ResourceValidator = Arc<dyn Fn(&Map<String, Value>) -> Option<String> + Send + Sync>;

/// Value type of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    String,
    Boolean,
    Integer,
    Number,
    /// Arbitrary JSON object or array (policy documents and the like).
    Json,
    /// String map, serialized as a `[{Key, Value}]` list.
    Tags,
    List(Box<ValueType>),
    /// One of a fixed set of strings.
    OneOf(Vec<String>),
}

impl ValueType {
    pub fn list(inner: ValueType) -> Self {
        ValueType::List(Box::new(inner))
    }

    pub fn one_of<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueType::OneOf(allowed.into_iter().map(Into::into).collect())
    }

    pub fn name(&self) -> String {
        match self {
            ValueType::String => "String".to_string(),
            ValueType::Boolean => "Boolean".to_string(),
            ValueType::Integer => "Integer".to_string(),
            ValueType::Number => "Number".to_string(),
            ValueType::Json => "Json".to_string(),
            ValueType::Tags => "Tags".to_string(),
            ValueType::List(inner) => format!("List<{}>", inner.name()),
            ValueType::OneOf(allowed) => format!("OneOf[{}]", allowed.join("|")),
        }
    }

    /// Whether `value` is acceptable for this type. Intrinsic functions are
    /// resolved by the control plane, so they are accepted wherever a value is.
    pub fn validate(&self, value: &Value) -> bool {
        if is_intrinsic(value) {
            return true;
        }
        match self {
            ValueType::String => value.is_string(),
            ValueType::Boolean => {
                value.is_boolean() || matches!(value.as_str(), Some("true" | "false"))
            }
            ValueType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_str().is_some_and(|s| s.parse::<i64>().is_ok())
            }
            ValueType::Number => {
                value.is_number() || value.as_str().is_some_and(|s| s.parse::<f64>().is_ok())
            }
            ValueType::Json => value.is_object() || value.is_array(),
            ValueType::Tags => match value {
                Value::Object(map) => map.values().all(|v| v.is_string() || is_intrinsic(v)),
                Value::Array(items) => items.iter().all(|item| {
                    item.get("Key").is_some_and(Value::is_string) && item.get("Value").is_some()
                }),
                _ => false,
            },
            ValueType::List(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| inner.validate(item))),
            ValueType::OneOf(allowed) => value
                .as_str()
                .is_some_and(|s| allowed.iter().any(|a| a == s)),
        }
    }

    /// Converts a validated value into its document form.
    pub fn serialize(&self, value: &Value) -> Value {
        match (self, value) {
            (ValueType::Tags, Value::Object(map)) => Value::Array(
                map.iter()
                    .map(|(key, value)| json!({ "Key": key, "Value": value }))
                    .collect(),
            ),
            (ValueType::List(inner), Value::Array(items)) => {
                Value::Array(items.iter().map(|item| inner.serialize(item)).collect())
            }
            _ => value.clone(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// `{"Ref": ..}` or `{"Fn::..": ..}`.
pub fn is_intrinsic(value: &Value) -> bool {
    match value.as_object() {
        Some(map) if map.len() == 1 => map
            .keys()
            .next()
            .is_some_and(|key| key == "Ref" || key.starts_with("Fn::")),
        _ => false,
    }
}

/// Schema entry for one property.
#[derive(Clone)]
pub struct PropertyDefinition {
    pub value_type: ValueType,
    pub required: bool,
    pub validators: Vec<PropertyValidator>,
}

impl PropertyDefinition {
    pub fn required(value_type: ValueType) -> Self {
        Self {
            value_type,
            required: true,
            validators: Vec::new(),
        }
    }

    pub fn optional(value_type: ValueType) -> Self {
        Self {
            value_type,
            required: false,
            validators: Vec::new(),
        }
    }

    /// Adds a custom validator. Validators run in the order they are added.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&ResourceInstance) -> Option<String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }
}

impl fmt::Debug for PropertyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDefinition")
            .field("value_type", &self.value_type)
            .field("required", &self.required)
            .field("validators", &self.validators.len())
            .finish()
    }
}

/// A resource type and its property schema, in declaration order.
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    resource_type: String,
    properties: Vec<(String, PropertyDefinition)>,
}

impl ResourceDefinition {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a property, replacing any earlier definition of the same name.
    pub fn with_property(mut self, name: impl Into<String>, definition: PropertyDefinition) -> Self {
        let name = name.into();
        match self.properties.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = definition,
            None => self.properties.push((name, definition)),
        }
        self
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, definition)| definition)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&String, &PropertyDefinition)> {
        self.properties.iter().map(|(name, definition)| (name, definition))
    }

    pub fn required_properties(&self) -> impl Iterator<Item = &String> {
        self.properties
            .iter()
            .filter(|(_, def)| def.required)
            .map(|(name, _)| name)
    }
}

/// A named resource bound to a shared definition. Properties and attributes
/// keep the order they were given in.
#[derive(Clone)]
pub struct ResourceInstance {
    definition: Arc<ResourceDefinition>,
    name: String,
    properties: Map<String, Value>,
    attributes: Map<String, Value>,
    validator: Option<ResourceValidator>,
}

impl ResourceInstance {
    pub fn new<I, K>(definition: &Arc<ResourceDefinition>, name: impl Into<String>, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            definition: Arc::clone(definition),
            name: name.into(),
            properties: properties
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
            attributes: Map::new(),
            validator: None,
        }
    }

    /// Adds a top-level attribute such as `DependsOn` or `DeletionPolicy`.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn depends_on<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<Value> = names.into_iter().map(|n| Value::String(n.into())).collect();
        self.with_attribute("DependsOn", Value::Array(names))
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Option<String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> &str {
        self.definition.resource_type()
    }

    pub fn definition(&self) -> &Arc<ResourceDefinition> {
        &self.definition
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// `{"Ref": name}` for use in other resources' properties.
    pub fn reference(&self) -> Value {
        json!({ "Ref": self.name })
    }

    pub fn get_att(&self, attribute: &str) -> Value {
        json!({ "Fn::GetAtt": [self.name, attribute] })
    }

    /// Checks the instance against its schema, failing on the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for property in self.definition.required_properties() {
            if !self.properties.contains_key(property) {
                return Err(ValidationError::MissingProperty {
                    resource: self.name.clone(),
                    property: property.clone(),
                });
            }
        }

        if let Some(validator) = &self.validator {
            if let Some(message) = validator(&self.properties) {
                return Err(ValidationError::Resource {
                    resource: self.name.clone(),
                    message,
                });
            }
        }

        for (property, value) in &self.properties {
            let definition =
                self.definition
                    .property(property)
                    .ok_or_else(|| ValidationError::UnknownProperty {
                        resource: self.name.clone(),
                        resource_type: self.resource_type().to_string(),
                        property: property.clone(),
                    })?;

            if !definition.value_type.validate(value) {
                return Err(ValidationError::TypeMismatch {
                    resource: self.name.clone(),
                    property: property.clone(),
                    expected: definition.value_type.name(),
                    actual: display_value(value),
                });
            }

            for validator in &definition.validators {
                if let Some(message) = validator(self) {
                    return Err(ValidationError::Property {
                        resource: self.name.clone(),
                        property: property.clone(),
                        message,
                    });
                }
            }
        }

        Ok(())
    }

    /// Validates, then renders `{Type, Properties, ..attributes}`.
    pub fn serialize(&self) -> Result<Value, ValidationError> {
        self.validate()?;

        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(key, value)| {
                let rendered = match self.definition.property(key) {
                    Some(def) => def.value_type.serialize(value),
                    None => value.clone(),
                };
                (key.clone(), rendered)
            })
            .collect();

        let mut object = Map::new();
        object.insert(
            "Type".to_string(),
            Value::String(self.resource_type().to_string()),
        );
        object.insert("Properties".to_string(), Value::Object(properties));
        for (key, value) in &self.attributes {
            object.insert(key.clone(), value.clone());
        }

        Ok(Value::Object(object))
    }
}

impl fmt::Debug for ResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceInstance")
            .field("type", &self.resource_type())
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("attributes", &self.attributes)
            .finish()
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

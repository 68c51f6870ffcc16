//! Dependency output interpolation.
//!
//! String values in a project file may reference outputs of the component's
//! dependencies as `${<dependency>.<Output>}`, e.g. `${network.VpcId}`.
//! References are substituted at build time, once the outputs are known.

use std::sync::LazyLock;

use nova_core::DependencyOutputs;
use regex::Regex;
use serde_json::Value;

// Matches ${component.Output}
static REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_:-]+)\}").expect("reference pattern is valid")
});

/// A `${dependency.output}` reference found in a string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutputReference {
    pub dependency: String,
    pub output: String,
}

impl std::fmt::Display for OutputReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.dependency, self.output)
    }
}

/// All references in `input`, in order of appearance.
pub fn find_references(input: &str) -> Vec<OutputReference> {
    REF_REGEX
        .captures_iter(input)
        .map(|caps| OutputReference {
            dependency: caps[1].to_string(),
            output: caps[2].to_string(),
        })
        .collect()
}

/// All references anywhere inside a JSON value.
pub fn find_value_references(value: &Value) -> Vec<OutputReference> {
    let mut found = Vec::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut Vec<OutputReference>) {
    match value {
        Value::String(s) => found.extend(find_references(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, found)),
        _ => {}
    }
}

/// Resolves references against the outputs of a component's dependencies.
#[derive(Debug, Clone, Copy)]
pub struct OutputContext<'a> {
    outputs: &'a DependencyOutputs,
}

impl<'a> OutputContext<'a> {
    pub fn new(outputs: &'a DependencyOutputs) -> Self {
        Self { outputs }
    }

    pub fn resolve(&self, reference: &OutputReference) -> Option<&'a str> {
        self.outputs
            .get(&reference.dependency)
            .and_then(|outputs| outputs.get(&reference.output))
            .map(String::as_str)
    }

    /// Substitutes every reference in `input`.
    /// Fails with the first reference that has no value.
    pub fn interpolate(&self, input: &str) -> Result<String, OutputReference> {
        let mut missing = None;
        let result = REF_REGEX.replace_all(input, |caps: &regex::Captures| {
            let reference = OutputReference {
                dependency: caps[1].to_string(),
                output: caps[2].to_string(),
            };
            match self.resolve(&reference) {
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert(reference);
                    String::new()
                }
            }
        });
        match missing {
            Some(reference) => Err(reference),
            None => Ok(result.into_owned()),
        }
    }

    /// Substitutes references in every string nested inside `value`.
    pub fn interpolate_value(&self, value: &Value) -> Result<Value, OutputReference> {
        Ok(match value {
            Value::String(s) => Value::String(self.interpolate(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.interpolate_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.interpolate_value(v)?)))
                    .collect::<Result<_, OutputReference>>()?,
            ),
            other => other.clone(),
        })
    }
}

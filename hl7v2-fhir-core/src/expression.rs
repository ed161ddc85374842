// Expression Tree
//
// This module defines the per-field expression node of a template and its
// evaluation against a data source, a context and an optional base value.

use crate::condition::Condition;
use crate::context::{ContextValues, BASE_VALUE_KEY};
use crate::data_source::DataSource;
use crate::data_type::DataType;
use crate::errors::{ConversionError, Result};
use crate::resource::ResourceTemplate;
use crate::script::Script;
use crate::specification::Specification;
use crate::value::{EvaluationResult, ResourceValue, Value};
use crate::variable::{resolve_specs, Variable};
use indexmap::IndexMap;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

/// A nested template, either registered by name or declared inline
#[derive(Debug, Clone)]
pub enum TemplateRef {
    Named(String),
    Inline(Arc<ResourceTemplate>),
}

impl TemplateRef {
    fn resolve(&self, data_source: &dyn DataSource) -> Result<Arc<ResourceTemplate>> {
        match self {
            TemplateRef::Inline(template) => Ok(Arc::clone(template)),
            TemplateRef::Named(name) => data_source.resource_template(name).ok_or_else(|| {
                ConversionError::InvalidTemplate(format!("Unknown resource template '{}'", name))
            }),
        }
    }

    /// Name of the referenced template
    pub fn name(&self) -> &str {
        match self {
            TemplateRef::Named(name) => name,
            TemplateRef::Inline(template) => template.name(),
        }
    }
}

/// What an expression produces
#[derive(Debug, Clone)]
pub enum ExpressionKind {
    /// A literal value
    Constant(Value),

    /// A `$variable` reference
    VariableRef(Specification),

    /// The base value itself
    Hl7Spec,

    /// A nested resource or datatype
    Resource(TemplateRef),

    /// A nested resource emitted alongside and referenced by `Type/id`
    Reference(TemplateRef),

    /// A `$name:field` read of an earlier value
    Fetch(Specification),

    /// A sandboxed script
    Evaluate(Script),
}

/// Attributes shared by every expression kind
#[derive(Debug, Clone, Default)]
pub struct ExpressionAttributes {
    pub value_type: Option<DataType>,
    pub specs: Vec<Specification>,
    pub default_value: Option<Value>,
    pub required: bool,
    pub variables: Vec<(String, Variable)>,
    pub condition: Option<Condition>,
    pub constants: IndexMap<String, Value>,
    pub use_group: bool,
    pub generate_list: bool,
}

/// One field of a template
#[derive(Debug, Clone)]
pub struct Expression {
    pub attributes: ExpressionAttributes,
    pub kind: ExpressionKind,
}

impl Expression {
    pub fn new(kind: ExpressionKind, attributes: ExpressionAttributes) -> Self {
        Self { attributes, kind }
    }

    pub fn constant(value: Value) -> Self {
        Self::new(ExpressionKind::Constant(value), ExpressionAttributes::default())
    }

    pub fn is_required(&self) -> bool {
        self.attributes.required
    }

    /// Evaluates the expression.
    ///
    /// Fails with `RequiredFieldMissing` when a required expression yields nothing
    /// and has no default.
    pub fn evaluate(
        &self,
        data_source: &dyn DataSource,
        context: &ContextValues,
        base: Option<&Value>,
    ) -> Result<EvaluationResult> {
        let attributes = &self.attributes;
        let mut local = context.extend(
            attributes
                .constants
                .iter()
                .map(|(name, value)| (name.clone(), EvaluationResult::simple(value.clone()))),
        );
        if let Some(base) = base.filter(|b| !b.is_empty()) {
            local = local.with(BASE_VALUE_KEY, EvaluationResult::simple(base.clone()));
        }

        let outcome = if attributes.specs.is_empty() {
            self.evaluate_once(data_source, &local, base)?
        } else {
            self.evaluate_specs(data_source, &local)?
        };

        let result = match outcome {
            Outcome::Skipped => return Ok(EvaluationResult::empty()),
            Outcome::Evaluated(result) => result,
        };
        if !result.is_empty() {
            return Ok(result);
        }

        if let Some(default) = &attributes.default_value {
            let result = EvaluationResult::simple(default.clone());
            if !result.is_empty() {
                return Ok(result);
            }
        }
        if attributes.required {
            return Err(ConversionError::RequiredFieldMissing(format!(
                "No value for required expression {}",
                self.describe()
            )));
        }
        Ok(result)
    }

    fn evaluate_specs(
        &self,
        data_source: &dyn DataSource,
        context: &ContextValues,
    ) -> Result<Outcome> {
        let attributes = &self.attributes;
        let resolved = resolve_specs(&attributes.specs, data_source, context, false)?;
        let Some(values) = resolved.into_value() else {
            return Ok(Outcome::Evaluated(EvaluationResult::empty()));
        };

        if attributes.generate_list {
            let mut items = Vec::new();
            let mut additional = Vec::new();
            let mut evaluated = false;
            for value in values.items() {
                match self.evaluate_once(data_source, context, Some(value)) {
                    Ok(Outcome::Skipped) => {}
                    Ok(Outcome::Evaluated(result)) => {
                        evaluated = true;
                        let (value, resources) = result.into_parts();
                        additional.extend(resources);
                        items.extend(value);
                    }
                    Err(ConversionError::NoMoreRepetitions(message)) => {
                        debug!("Stopping list generation: {}", message);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if !evaluated {
                return Ok(Outcome::Skipped);
            }
            return Ok(Outcome::Evaluated(
                EvaluationResult::simple(Value::List(items)).with_additional_resources(additional),
            ));
        }

        let mut evaluated = false;
        for value in values.items() {
            match self.evaluate_once(data_source, context, Some(value))? {
                Outcome::Skipped => {}
                Outcome::Evaluated(result) if result.is_empty() => evaluated = true,
                found => return Ok(found),
            }
        }
        Ok(if evaluated {
            Outcome::Evaluated(EvaluationResult::empty())
        } else {
            Outcome::Skipped
        })
    }

    fn evaluate_once(
        &self,
        data_source: &dyn DataSource,
        context: &ContextValues,
        base: Option<&Value>,
    ) -> Result<Outcome> {
        let attributes = &self.attributes;
        let mut local = match base.filter(|b| !b.is_empty()) {
            Some(base) => context.with(BASE_VALUE_KEY, EvaluationResult::simple(base.clone())),
            None => context.clone(),
        };

        for (name, variable) in &attributes.variables {
            let value = variable.evaluate(data_source, &local, attributes.use_group)?;
            local = local.with(name.clone(), value);
        }

        if let Some(condition) = &attributes.condition {
            if !condition.test(&local) {
                debug!("Condition {:?} not satisfied, skipping", condition);
                return Ok(Outcome::Skipped);
            }
        }

        let result = self.evaluate_kind(data_source, &local)?;
        let result = match &attributes.value_type {
            Some(value_type) => {
                let (value, additional) = result.into_parts();
                value
                    .and_then(|value| value_type.coerce_value(&value, data_source))
                    .map(EvaluationResult::simple)
                    .unwrap_or_default()
                    .with_additional_resources(additional)
            }
            None => result,
        };
        Ok(Outcome::Evaluated(result))
    }

    fn evaluate_kind(
        &self,
        data_source: &dyn DataSource,
        context: &ContextValues,
    ) -> Result<EvaluationResult> {
        match &self.kind {
            ExpressionKind::Constant(value) => Ok(EvaluationResult::simple(value.clone())),
            ExpressionKind::VariableRef(spec) | ExpressionKind::Fetch(spec) => {
                resolve_specs(std::slice::from_ref(spec), data_source, context, false)
            }
            ExpressionKind::Hl7Spec => Ok(context
                .base()
                .cloned()
                .map(EvaluationResult::simple)
                .unwrap_or_default()),
            ExpressionKind::Resource(template) => {
                let template = template.resolve(data_source)?;
                let Some(evaluated) = template.evaluate(data_source, context, context.base())
                else {
                    return Ok(EvaluationResult::empty());
                };
                Ok(EvaluationResult::simple(Value::Resource(evaluated.resource))
                    .with_additional_resources(evaluated.additional_resources))
            }
            ExpressionKind::Reference(template) => {
                let template = template.resolve(data_source)?;
                let Some(evaluated) = template.evaluate(data_source, context, context.base())
                else {
                    return Ok(EvaluationResult::empty());
                };
                let mut resource = evaluated.resource;
                let id = match resource.id() {
                    Some(id) => id,
                    None => {
                        let id = Uuid::new_v4().to_string();
                        resource.set_id(id.clone());
                        id
                    }
                };
                let reference = reference_value(&resource, &id);
                let mut additional = vec![resource];
                additional.extend(evaluated.additional_resources);
                Ok(EvaluationResult::simple(reference)
                    .with_identifier("Reference")
                    .with_additional_resources(additional))
            }
            ExpressionKind::Evaluate(script) => {
                let variables = context.to_variables();
                Ok(data_source
                    .evaluate_script(script, &variables)?
                    .map(EvaluationResult::simple)
                    .unwrap_or_default())
            }
        }
    }

    fn describe(&self) -> String {
        match &self.kind {
            ExpressionKind::Constant(value) => format!("constant {:?}", value.as_text()),
            ExpressionKind::VariableRef(spec) => format!("variable {}", spec),
            ExpressionKind::Hl7Spec => {
                let specs: Vec<String> =
                    self.attributes.specs.iter().map(|s| s.to_string()).collect();
                format!("spec [{}]", specs.join(" | "))
            }
            ExpressionKind::Resource(template) => format!("resource {}", template.name()),
            ExpressionKind::Reference(template) => format!("reference {}", template.name()),
            ExpressionKind::Fetch(spec) => format!("fetch {}", spec),
            ExpressionKind::Evaluate(script) => format!("evaluate {}", script),
        }
    }
}

enum Outcome {
    Skipped,
    Evaluated(EvaluationResult),
}

fn reference_value(resource: &ResourceValue, id: &str) -> Value {
    let resource_type = resource
        .resource_type()
        .unwrap_or_else(|| resource.resource_class().to_string());
    Value::Json(serde_json::json!({ "reference": format!("{}/{}", resource_type, id) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_value_uses_resource_type() {
        let mut fields = IndexMap::new();
        fields.insert("resourceType".to_string(), Value::from("Practitioner"));
        let resource = ResourceValue::new("Practitioner", fields).unwrap();
        assert_eq!(
            reference_value(&resource, "abc").to_json(),
            serde_json::json!({ "reference": "Practitioner/abc" })
        );
    }
}

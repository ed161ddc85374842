// Resource Orchestrator
//
// This module evaluates a resource or datatype template field by field and
// assembles the non-empty results into a resource value.

use crate::context::{ContextValues, KEY_NAME_SUFFIX};
use crate::data_source::DataSource;
use crate::errors::{ConversionError, Result};
use crate::expression::{Expression, ExpressionKind};
use crate::value::{EvaluationResult, ResourceValue, Value};
use indexmap::IndexMap;
use log::{debug, error, warn};

const RESOURCE_TYPE_FIELD: &str = "resourceType";
const ID_FIELD: &str = "id";

/// A named template producing one resource or datatype
#[derive(Debug, Clone)]
pub struct ResourceTemplate {
    name: String,
    resource_class: String,
    expressions: IndexMap<String, Expression>,
}

/// Outcome of a successful template evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvaluationResult {
    pub resource: ResourceValue,
    pub additional_resources: Vec<ResourceValue>,
}

impl ResourceTemplate {
    /// Creates a template. The resource class is the constant `resourceType`
    /// when one is declared, else the template name.
    pub fn new(name: impl Into<String>, expressions: IndexMap<String, Expression>) -> Self {
        let name = name.into();
        let resource_class = expressions
            .get(RESOURCE_TYPE_FIELD)
            .and_then(|expr| match &expr.kind {
                ExpressionKind::Constant(value) => value.as_text(),
                _ => None,
            })
            .unwrap_or_else(|| name.clone());
        Self {
            name,
            resource_class,
            expressions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_class(&self) -> &str {
        &self.resource_class
    }

    pub fn expressions(&self) -> &IndexMap<String, Expression> {
        &self.expressions
    }

    /// Evaluates every field.
    ///
    /// Returns `None` when nothing was produced or evaluation failed. A missing
    /// required field is logged as a warning, any other failure as an error.
    pub fn evaluate(
        &self,
        data_source: &dyn DataSource,
        context: &ContextValues,
        base: Option<&Value>,
    ) -> Option<ResourceEvaluationResult> {
        match self.try_evaluate(data_source, context, base) {
            Ok(result) => result,
            Err(ConversionError::RequiredFieldMissing(message)) => {
                warn!("Skipping {}: {}", self.name, message);
                None
            }
            Err(err) => {
                error!("Failed to evaluate {}: {}", self.name, err);
                None
            }
        }
    }

    fn try_evaluate(
        &self,
        data_source: &dyn DataSource,
        context: &ContextValues,
        base: Option<&Value>,
    ) -> Result<Option<ResourceEvaluationResult>> {
        let mut fields = Fields::default();
        let mut local = context.clone();

        let typed = match self.expressions.get(RESOURCE_TYPE_FIELD) {
            Some(expression) => {
                let result = expression.evaluate(data_source, &local, base)?;
                let resource_type = result.value().and_then(Value::as_text);
                fields.record(RESOURCE_TYPE_FIELD, result);

                if let Some(expression) = self.expressions.get(ID_FIELD) {
                    let result = expression.evaluate(data_source, &local, base)?;
                    if let (Some(resource_type), false) = (&resource_type, result.is_empty()) {
                        local = local.with(format!("{}_id", resource_type), result.clone());
                    }
                    fields.record(ID_FIELD, result);
                }
                true
            }
            None => false,
        };

        for (name, expression) in &self.expressions {
            if name == RESOURCE_TYPE_FIELD || (typed && name == ID_FIELD) {
                continue;
            }
            let result = expression.evaluate(data_source, &local, base)?;
            fields.record(&field_key(name, &local), result);
        }

        let Fields {
            mut values,
            additional_resources,
        } = fields;
        values.retain(|_, value| !value.is_empty() && !value.to_json().is_null());

        match ResourceValue::new(self.resource_class.clone(), values) {
            Some(resource) => Ok(Some(ResourceEvaluationResult {
                resource,
                additional_resources,
            })),
            None => {
                debug!("Template {} produced no fields", self.name);
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
struct Fields {
    values: IndexMap<String, Value>,
    additional_resources: Vec<ResourceValue>,
}

impl Fields {
    /// Stores a field. A value landing on an existing list is appended to it.
    fn record(&mut self, key: &str, result: EvaluationResult) {
        let (value, resources) = result.into_parts();
        self.additional_resources.extend(resources);
        let Some(value) = value else {
            return;
        };

        match self.values.get_mut(key) {
            Some(Value::List(existing)) => match value {
                Value::List(items) => existing.extend(items),
                single => existing.push(single),
            },
            Some(existing) => *existing = value,
            None => {
                self.values.insert(key.to_string(), value);
            }
        }
    }
}

/// Rewrites a `_KEY_NAME_SUFFIX` field name with the active group id
fn field_key(name: &str, context: &ContextValues) -> String {
    match name.strip_suffix(KEY_NAME_SUFFIX) {
        Some(stem) => match context.group_id() {
            Some(group_id) => format!("{}_{}", stem, group_id),
            None => stem.to_string(),
        },
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GROUP_ID_KEY;

    #[test]
    fn test_field_key_suffix() {
        let context = ContextValues::new();
        assert_eq!(field_key("obs_KEY_NAME_SUFFIX", &context), "obs");
        assert_eq!(field_key("status", &context), "status");

        let grouped = context.with(GROUP_ID_KEY, EvaluationResult::simple("OBX_1".into()));
        assert_eq!(field_key("obs_KEY_NAME_SUFFIX", &grouped), "obs_OBX_1");
    }

    #[test]
    fn test_record_merges_into_lists() {
        let mut fields = Fields::default();
        fields.record("name", EvaluationResult::simple(Value::List(vec!["a".into()])));
        fields.record("name", EvaluationResult::simple("b".into()));
        fields.record("status", EvaluationResult::simple("draft".into()));
        fields.record("status", EvaluationResult::simple("final".into()));
        fields.record("empty", EvaluationResult::empty());

        assert_eq!(
            fields.values.get("name"),
            Some(&Value::List(vec!["a".into(), "b".into()]))
        );
        assert_eq!(fields.values.get("status"), Some(&Value::from("final")));
        assert!(!fields.values.contains_key("empty"));
    }
}

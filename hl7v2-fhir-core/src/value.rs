// Engine Data Model
//
// This module defines the values that flow between evaluation steps, the result
// envelope every expression returns, and the generated resource shape.

use hl7v2_model::{Element, SegmentInstance};
use indexmap::IndexMap;

/// Runtime value produced by extraction, scripts or templates
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),

    Integer(i64),

    Decimal(f64),

    Boolean(bool),

    /// HL7 field repetition, component or subcomponent
    Element(Element),

    /// Segment together with its location in the message
    Segment(SegmentInstance),

    List(Vec<Value>),

    /// Nested generated resource or datatype
    Resource(ResourceValue),

    /// Structured data such as a Coding or a literal template constant
    Json(serde_json::Value),
}

impl Value {
    /// Type tag used for predicate selection and result identification
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "String",
            Value::Integer(_) => "Integer",
            Value::Decimal(_) => "Decimal",
            Value::Boolean(_) => "Boolean",
            Value::Element(_) => "Element",
            Value::Segment(_) => "Segment",
            Value::List(_) => "List",
            Value::Resource(_) => "Resource",
            Value::Json(_) => "Json",
        }
    }

    /// Renders scalar-like values as text.
    ///
    /// Elements render as their first primitive part and lists as their first item.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Decimal(d) => Some(d.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Element(element) => Some(element.text().to_string()),
            Value::Segment(_) | Value::Resource(_) => None,
            Value::List(items) => items.first().and_then(Value::as_text),
            Value::Json(json) => match json {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                serde_json::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            },
        }
    }

    /// True for values that carry no data: blank strings, blank elements, empty
    /// lists and JSON null
    pub fn is_empty(&self) -> bool {
        match self {
            Value::String(s) => s.trim().is_empty(),
            Value::Element(element) => element.is_empty(),
            Value::List(items) => items.iter().all(Value::is_empty),
            Value::Json(serde_json::Value::Null) => true,
            Value::Json(serde_json::Value::String(s)) => s.trim().is_empty(),
            Value::Json(serde_json::Value::Array(items)) => items.is_empty(),
            _ => false,
        }
    }

    /// Flattens one level of list nesting into a vector of values
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Value::List(items) => items,
            other => vec![other],
        }
    }

    /// Iterates a list value's items, or the value itself
    pub fn items(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::List(items) => Box::new(items.iter()),
            other => Box::new(std::iter::once(other)),
        }
    }

    pub fn as_segment(&self) -> Option<&SegmentInstance> {
        match self {
            Value::Segment(segment) => Some(segment),
            _ => None,
        }
    }

    /// Reads a named sub-value from a resource-shaped value; lists are mapped
    /// element-wise
    pub fn get(&self, name: &str) -> Option<Value> {
        match self {
            Value::Resource(resource) => resource.get(name).cloned(),
            Value::Json(serde_json::Value::Object(map)) => {
                map.get(name).cloned().map(Value::from_json)
            }
            Value::List(items) => {
                let found: Vec<Value> = items.iter().filter_map(|item| item.get(name)).collect();
                if found.is_empty() {
                    None
                } else {
                    Some(Value::List(found))
                }
            }
            _ => None,
        }
    }

    /// Converts a JSON value into an engine value
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Decimal(f)
                } else {
                    Value::Json(serde_json::Value::Number(n))
                }
            }
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            other => Value::Json(other),
        }
    }

    /// Renders the value as FHIR JSON
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::Number(serde_json::Number::from(*i)),
            Value::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Element(element) => serde_json::Value::String(element.text().to_string()),
            Value::Segment(instance) => {
                serde_json::to_value(instance.segment.as_ref()).unwrap_or(serde_json::Value::Null)
            }
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .filter(|json| !json.is_null())
                    .collect(),
            ),
            Value::Resource(resource) => resource.to_json(),
            Value::Json(json) => json.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// Envelope returned by every evaluation step
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluationResult {
    value: Option<Value>,
    identifier: Option<String>,
    additional_resources: Vec<ResourceValue>,
}

impl EvaluationResult {
    /// A result without a value
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result holding a value; values without data produce an empty result
    pub fn simple(value: Value) -> Self {
        if value.is_empty() {
            return Self::empty();
        }
        Self {
            value: Some(value),
            identifier: None,
            additional_resources: Vec::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_additional_resources(mut self, resources: Vec<ResourceValue>) -> Self {
        self.additional_resources.extend(resources);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }

    /// Type tag of the result: the explicit identifier or the value's runtime type
    pub fn identifier(&self) -> Option<&str> {
        self.identifier
            .as_deref()
            .or_else(|| self.value.as_ref().map(Value::type_name))
    }

    pub fn additional_resources(&self) -> &[ResourceValue] {
        &self.additional_resources
    }

    /// Splits the result into its value and its side-effect resources
    pub fn into_parts(self) -> (Option<Value>, Vec<ResourceValue>) {
        (self.value, self.additional_resources)
    }
}

/// A generated resource or datatype prior to serialization
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceValue {
    resource_class: String,
    fields: IndexMap<String, Value>,
}

impl ResourceValue {
    /// Creates a resource value; returns `None` for an empty field map or a blank class
    pub fn new(resource_class: impl Into<String>, fields: IndexMap<String, Value>) -> Option<Self> {
        let resource_class = resource_class.into();
        if fields.is_empty() || resource_class.trim().is_empty() {
            return None;
        }
        Some(Self {
            resource_class,
            fields,
        })
    }

    pub fn resource_class(&self) -> &str {
        &self.resource_class
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// FHIR `resourceType`, when the template declared one
    pub fn resource_type(&self) -> Option<String> {
        self.fields.get("resourceType").and_then(Value::as_text)
    }

    pub fn id(&self) -> Option<String> {
        self.fields.get("id").and_then(Value::as_text)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.fields.insert("id".to_string(), Value::String(id.into()));
    }

    /// Converts the resource to a FHIR JSON object, `resourceType` first
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        if let Some(resource_type) = self.fields.get("resourceType") {
            map.insert("resourceType".to_string(), resource_type.to_json());
        }

        for (key, value) in &self.fields {
            if key == "resourceType" {
                continue;
            }
            let json = value.to_json();
            if !json.is_null() {
                map.insert(key.clone(), json);
            }
        }

        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_result_of_blank_value_is_empty() {
        assert!(EvaluationResult::simple(Value::from("  ")).is_empty());
        assert!(EvaluationResult::simple(Value::Json(serde_json::Value::Null)).is_empty());
        assert!(EvaluationResult::simple(Value::List(vec![])).is_empty());
        assert!(!EvaluationResult::simple(Value::Integer(0)).is_empty());
    }

    #[test]
    fn test_identifier_defaults_to_type_name() {
        let result = EvaluationResult::simple(Value::Integer(3));
        assert_eq!(result.identifier(), Some("Integer"));
        let result = result.with_identifier("Quantity");
        assert_eq!(result.identifier(), Some("Quantity"));
    }

    #[test]
    fn test_resource_value_requires_fields_and_class() {
        assert!(ResourceValue::new("Patient", IndexMap::new()).is_none());
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::from("1"));
        assert!(ResourceValue::new(" ", fields.clone()).is_none());
        assert!(ResourceValue::new("Patient", fields).is_some());
    }

    #[test]
    fn test_resource_type_rendered_first() {
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), Value::from("p1"));
        fields.insert("resourceType".to_string(), Value::from("Patient"));
        let resource = ResourceValue::new("Patient", fields).unwrap();
        let json = resource.to_json();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["resourceType", "id"]);
    }
}

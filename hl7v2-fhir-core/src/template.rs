// Template Loading
//
// This module deserializes resource templates and message templates from YAML
// or JSON and keeps them in a registry. Every condition, variable, script and
// type is parsed at load time.
//
// A field maps to one expression. The kind is chosen by the first sentinel key
// present, in the order `spec`, `reference`, `fetch`, `evaluate`, `resource`;
// otherwise the `value` key or a scalar shorthand is used.

use crate::condition::Condition;
use crate::config::ConverterOptions;
use crate::data_type::DataType;
use crate::errors::{ConversionError, Result};
use crate::expression::{Expression, ExpressionAttributes, ExpressionKind, TemplateRef};
use crate::extraction::SegmentPath;
use crate::resource::ResourceTemplate;
use crate::script::{Script, ScriptEngine};
use crate::specification::Specification;
use crate::value::Value;
use crate::variable::{parse_spec_list, parse_specs, Variable};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

const SENTINEL_KEYS: &[&str] = &["spec", "reference", "fetch", "evaluate", "resource"];

const ATTRIBUTE_KEYS: &[&str] = &[
    "type",
    "specs",
    "default",
    "required",
    "var",
    "vars",
    "condition",
    "constants",
    "useGroup",
    "generateList",
    "isGenerateList",
    "value",
];

struct TemplateParser<'a> {
    extra_segments: &'a [String],
}

impl TemplateParser<'_> {
    fn resource(&self, name: &str, map: &Map<String, JsonValue>) -> Result<ResourceTemplate> {
        let mut expressions = IndexMap::with_capacity(map.len());
        for (field, node) in map {
            let expression = self.expression(field, node).map_err(|err| match err {
                ConversionError::InvalidTemplate(message) => {
                    ConversionError::InvalidTemplate(format!("{}.{}: {}", name, field, message))
                }
                other => other,
            })?;
            expressions.insert(field.clone(), expression);
        }
        Ok(ResourceTemplate::new(name, expressions))
    }

    fn expression(&self, field: &str, node: &JsonValue) -> Result<Expression> {
        match node {
            JsonValue::Object(map) => self.mapping(field, map),
            JsonValue::String(text) if text.trim_start().starts_with('$') => Ok(Expression::new(
                ExpressionKind::VariableRef(self.variable_spec(text, false, false)?),
                ExpressionAttributes::default(),
            )),
            other => Ok(Expression::constant(Value::from_json(other.clone()))),
        }
    }

    fn mapping(&self, field: &str, map: &Map<String, JsonValue>) -> Result<Expression> {
        let known = |key: &str| SENTINEL_KEYS.contains(&key) || ATTRIBUTE_KEYS.contains(&key);
        if let Some(unknown) = map.keys().find(|key| !known(key.as_str())) {
            return Err(ConversionError::InvalidTemplate(format!(
                "Unknown attribute '{}'",
                unknown
            )));
        }
        if map.contains_key("spec") && map.contains_key("specs") {
            return Err(ConversionError::InvalidTemplate(
                "Use either 'spec' or 'specs', not both".to_string(),
            ));
        }

        let use_group = flag(map, &["useGroup"])?;
        let (raw_specs, marker) = match map.get("spec").or_else(|| map.get("specs")) {
            Some(node) => spec_strings(node)?,
            None => (Vec::new(), None),
        };
        let generate_list = flag(map, &["generateList", "isGenerateList"])? || marker == Some('*');

        let attributes = ExpressionAttributes {
            value_type: match map.get("type") {
                Some(node) => Some(text(node, "type")?.trim().parse::<DataType>()?),
                None => None,
            },
            specs: parse_specs(&raw_specs, generate_list, use_group, self.extra_segments),
            default_value: map.get("default").cloned().map(Value::from_json),
            required: flag(map, &["required"])?,
            variables: self.variables(map)?,
            condition: match map.get("condition") {
                Some(node) => Some(Condition::parse(text(node, "condition")?)?),
                None => None,
            },
            constants: match map.get("constants") {
                Some(JsonValue::Object(constants)) => constants
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::from_json(value.clone())))
                    .collect(),
                Some(_) => {
                    return Err(ConversionError::InvalidTemplate(
                        "'constants' must be a mapping".to_string(),
                    ))
                }
                None => IndexMap::new(),
            },
            use_group,
            generate_list,
        };

        let kind = if map.contains_key("spec") {
            ExpressionKind::Hl7Spec
        } else if let Some(node) = map.get("reference") {
            ExpressionKind::Reference(self.template_ref(field, node)?)
        } else if let Some(node) = map.get("fetch") {
            ExpressionKind::Fetch(self.variable_spec(text(node, "fetch")?, false, use_group)?)
        } else if let Some(node) = map.get("evaluate") {
            ExpressionKind::Evaluate(Script::parse(text(node, "evaluate")?)?)
        } else if let Some(node) = map.get("resource") {
            ExpressionKind::Resource(self.template_ref(field, node)?)
        } else {
            match map.get("value") {
                Some(JsonValue::String(value)) if value.trim_start().starts_with('$') => {
                    ExpressionKind::VariableRef(self.variable_spec(value, false, use_group)?)
                }
                Some(value) => ExpressionKind::Constant(Value::from_json(value.clone())),
                None => ExpressionKind::Hl7Spec,
            }
        };

        Ok(Expression::new(kind, attributes))
    }

    fn variables(&self, map: &Map<String, JsonValue>) -> Result<Vec<(String, Variable)>> {
        let mut variables = Vec::new();
        for key in ["var", "vars"] {
            match map.get(key) {
                Some(JsonValue::Object(entries)) => {
                    for (name, raw) in entries {
                        let variable = Variable::parse(name, text(raw, name)?)?;
                        variables.push((name.clone(), variable));
                    }
                }
                Some(_) => {
                    return Err(ConversionError::InvalidTemplate(format!(
                        "'{}' must be a mapping",
                        key
                    )))
                }
                None => {}
            }
        }
        Ok(variables)
    }

    fn variable_spec(
        &self,
        raw: &str,
        extract_multiple: bool,
        use_group: bool,
    ) -> Result<Specification> {
        let extra = self.extra_segments;
        match Specification::parse_with_segments(raw, extract_multiple, use_group, extra) {
            spec @ Specification::Simple(_) => Ok(spec),
            Specification::Hl7(_) => Err(ConversionError::InvalidTemplate(format!(
                "'{}' is not a $variable reference",
                raw
            ))),
        }
    }

    fn template_ref(&self, field: &str, node: &JsonValue) -> Result<TemplateRef> {
        match node {
            JsonValue::String(name) if !name.trim().is_empty() => {
                Ok(TemplateRef::Named(name.trim().to_string()))
            }
            JsonValue::Object(map) => {
                Ok(TemplateRef::Inline(Arc::new(self.resource(field, map)?)))
            }
            _ => Err(ConversionError::InvalidTemplate(format!(
                "Nested template of '{}' must be a name or a mapping",
                field
            ))),
        }
    }
}

fn text<'a>(node: &'a JsonValue, key: &str) -> Result<&'a str> {
    node.as_str()
        .ok_or_else(|| ConversionError::InvalidTemplate(format!("'{}' must be a string", key)))
}

fn flag(map: &Map<String, JsonValue>, keys: &[&str]) -> Result<bool> {
    for key in keys {
        match map.get(*key) {
            Some(JsonValue::Bool(value)) => return Ok(*value),
            Some(_) => {
                return Err(ConversionError::InvalidTemplate(format!(
                    "'{}' must be a boolean",
                    key
                )))
            }
            None => {}
        }
    }
    Ok(false)
}

fn spec_strings(node: &JsonValue) -> Result<(Vec<String>, Option<char>)> {
    match node {
        JsonValue::String(raw) => parse_spec_list(raw),
        JsonValue::Array(items) => {
            let specs = items
                .iter()
                .map(|item| text(item, "specs").map(|s| s.trim().to_string()))
                .collect::<Result<Vec<_>>>()?;
            Ok((specs, None))
        }
        _ => Err(ConversionError::InvalidTemplate(
            "specs must be a string or a list of strings".to_string(),
        )),
    }
}

fn yaml_to_json(text: &str) -> Result<JsonValue> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(text)?;
    Ok(serde_json::to_value(yaml)?)
}

impl ResourceTemplate {
    pub fn from_yaml_str(name: &str, text: &str) -> Result<Self> {
        Self::from_json(name, &yaml_to_json(text)?)
    }

    pub fn from_json(name: &str, json: &JsonValue) -> Result<Self> {
        Self::from_json_with_segments(name, json, &[])
    }

    /// Parses a template, recognising additional segment names in its specs
    pub fn from_json_with_segments(
        name: &str,
        json: &JsonValue,
        extra_segments: &[String],
    ) -> Result<Self> {
        match json {
            JsonValue::Object(map) => TemplateParser { extra_segments }.resource(name, map),
            _ => Err(ConversionError::InvalidTemplate(format!(
                "Template {} must be a mapping of fields",
                name
            ))),
        }
    }
}

/// One resource produced from a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBinding {
    /// Name of the resource template
    pub resource_name: String,

    /// Primary segment path, e.g. `.PROCEDURE.PR1`
    pub segment: String,

    /// Parent group path the group id is anchored on
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub additional_segments: Vec<String>,

    /// Whether every repetition produces a resource
    #[serde(default)]
    pub repeats: bool,

    /// Whether other resources reference this one; referenced resources always
    /// carry an id
    #[serde(default)]
    pub is_referenced: bool,
}

impl ResourceBinding {
    pub fn segment_path(&self) -> SegmentPath {
        SegmentPath::parse(&self.segment)
    }

    pub fn parent_group_path(&self) -> Option<Vec<String>> {
        let group = self.group.as_deref()?;
        let names: Vec<String> = group
            .split('.')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        Some(names).filter(|n| !n.is_empty())
    }

    pub fn additional_segment_paths(&self) -> Vec<SegmentPath> {
        self.additional_segments
            .iter()
            .map(|path| SegmentPath::parse(path))
            .collect()
    }
}

/// The resources generated from one message type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    /// Message type, e.g. `ADT_A01`
    pub message_name: String,
    pub resources: Vec<ResourceBinding>,
}

impl MessageTemplate {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json(json: JsonValue) -> Result<Self> {
        Ok(serde_json::from_value(json)?)
    }
}

/// Named resource templates and message templates
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    resources: HashMap<String, Arc<ResourceTemplate>>,
    messages: HashMap<String, MessageTemplate>,
    extra_segments: Vec<String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose templates recognise additional segment names
    pub fn with_extra_segments(extra_segments: Vec<String>) -> Self {
        Self {
            extra_segments,
            ..Self::default()
        }
    }

    /// Creates a registry parsing specs with the segment names in `options`
    pub fn for_options(options: &ConverterOptions) -> Self {
        Self::with_extra_segments(options.extra_segments.clone())
    }

    /// Additional segment names template specs are parsed with
    pub fn extra_segments(&self) -> &[String] {
        &self.extra_segments
    }

    pub fn add_resource(&mut self, template: ResourceTemplate) {
        debug!("Registering resource template {}", template.name());
        self.resources
            .insert(template.name().to_string(), Arc::new(template));
    }

    pub fn add_resource_yaml(&mut self, name: &str, text: &str) -> Result<()> {
        self.add_resource_json(name, &yaml_to_json(text)?)
    }

    pub fn add_resource_json(&mut self, name: &str, json: &JsonValue) -> Result<()> {
        let template = ResourceTemplate::from_json_with_segments(name, json, &self.extra_segments)?;
        self.add_resource(template);
        Ok(())
    }

    pub fn add_message(&mut self, template: MessageTemplate) {
        debug!("Registering message template {}", template.message_name);
        self.messages.insert(template.message_name.clone(), template);
    }

    pub fn add_message_yaml(&mut self, text: &str) -> Result<()> {
        self.add_message(MessageTemplate::from_yaml_str(text)?);
        Ok(())
    }

    pub fn resource(&self, name: &str) -> Option<Arc<ResourceTemplate>> {
        self.resources.get(name).cloned()
    }

    pub fn message(&self, message_type: &str) -> Option<&MessageTemplate> {
        self.messages.get(message_type)
    }

    /// Registered resource template names, sorted
    pub fn resource_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Checks that every template name referenced by a binding or a nested
    /// expression is registered
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        for message in self.messages.values() {
            for binding in &message.resources {
                if !self.resources.contains_key(&binding.resource_name) {
                    missing.push(format!(
                        "{} (in {})",
                        binding.resource_name, message.message_name
                    ));
                }
            }
        }
        for template in self.resources.values() {
            self.collect_missing(template, &mut missing);
        }

        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        missing.dedup();
        Err(ConversionError::InvalidTemplate(format!(
            "Unknown templates: {}",
            missing.join(", ")
        )))
    }

    /// Checks every script in every template against the function registry
    pub fn validate_scripts(&self, scripts: &ScriptEngine) -> Result<()> {
        let mut failures = Vec::new();
        for name in self.resource_names() {
            if let Some(template) = self.resources.get(name) {
                collect_script_failures(template, scripts, &mut failures);
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        Err(ConversionError::IllegalExpression(failures.join("; ")))
    }

    fn collect_missing(&self, template: &ResourceTemplate, missing: &mut Vec<String>) {
        for expression in template.expressions().values() {
            match &expression.kind {
                ExpressionKind::Resource(reference) | ExpressionKind::Reference(reference) => {
                    match reference {
                        TemplateRef::Named(name) if !self.resources.contains_key(name) => {
                            missing.push(format!("{} (in {})", name, template.name()))
                        }
                        TemplateRef::Inline(inline) => self.collect_missing(inline, missing),
                        TemplateRef::Named(_) => {}
                    }
                }
                _ => {}
            }
        }
    }
}

fn collect_script_failures(
    template: &ResourceTemplate,
    scripts: &ScriptEngine,
    failures: &mut Vec<String>,
) {
    for (field, expression) in template.expressions() {
        let mut check = |script: &Script| {
            if let Err(err) = scripts.check(script) {
                failures.push(format!("{}.{}: {}", template.name(), field, err));
            }
        };

        if let ExpressionKind::Evaluate(script) = &expression.kind {
            check(script);
        }
        for (_, variable) in &expression.attributes.variables {
            if let Variable::Expression { expression, .. } = variable {
                check(expression);
            }
        }

        match &expression.kind {
            ExpressionKind::Resource(TemplateRef::Inline(inline))
            | ExpressionKind::Reference(TemplateRef::Inline(inline)) => {
                collect_script_failures(inline, scripts, failures)
            }
            _ => {}
        }
    }
}

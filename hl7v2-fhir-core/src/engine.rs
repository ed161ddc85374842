// Message Engine
//
// This module converts one parsed HL7 message into FHIR resources by running
// every resource binding of the message template over its segment groups.

use crate::config::ConverterOptions;
use crate::context::{ContextValues, GROUP_ID_KEY};
use crate::data_source::Hl7DataSource;
use crate::errors::{ConversionError, Result};
use crate::extraction::{extract_segment_groups, SegmentGroup};
use crate::script::{FunctionRegistry, ScriptEngine};
use crate::template::{ResourceBinding, TemplateRegistry};
use crate::terminology::TerminologyService;
use crate::value::{EvaluationResult, ResourceValue, Value};
use chrono::{SecondsFormat, Utc};
use hl7v2_model::{parse_message, Message};
use indexmap::IndexMap;
use log::{debug, error, info};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Converts HL7 messages using shared, immutable templates
#[derive(Debug, Clone)]
pub struct MessageEngine {
    templates: Arc<TemplateRegistry>,
    scripts: ScriptEngine,
    terminology: Arc<TerminologyService>,
    options: ConverterOptions,
}

impl MessageEngine {
    /// Creates an engine.
    ///
    /// Fails when the templates were parsed with other extra segment names than
    /// `options` declares, or when a template script calls an unregistered
    /// function.
    pub fn new(
        templates: Arc<TemplateRegistry>,
        terminology: Arc<TerminologyService>,
        options: ConverterOptions,
    ) -> Result<Self> {
        check_extra_segments(&templates, &options)?;
        let scripts = ScriptEngine::new(FunctionRegistry::with_defaults(&options.custom_namespace));
        templates.validate_scripts(&scripts)?;
        Ok(Self {
            templates,
            scripts,
            terminology,
            options,
        })
    }

    /// Replaces the function registry scripts run against
    pub fn with_function_registry(mut self, registry: FunctionRegistry) -> Result<Self> {
        let scripts = ScriptEngine::new(registry);
        self.templates.validate_scripts(&scripts)?;
        self.scripts = scripts;
        Ok(self)
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn terminology(&self) -> &TerminologyService {
        &self.terminology
    }

    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    /// Parses and converts a message
    pub fn convert_str(&self, text: &str) -> Result<ConversionOutcome> {
        let message = parse_message(text)?;
        self.convert(&message)
    }

    /// Converts a message.
    ///
    /// Fails only when no message template matches. A resource that cannot be
    /// produced is logged and left out.
    pub fn convert(&self, message: &Message) -> Result<ConversionOutcome> {
        let template = self
            .templates
            .message(message.message_type())
            .or_else(|| self.templates.message(message.structure_name()))
            .ok_or_else(|| {
                ConversionError::UnsupportedMessage(format!(
                    "No message template for {}",
                    message.message_type()
                ))
            })?;

        let data_source = Hl7DataSource::new(
            message,
            &self.templates,
            &self.scripts,
            &self.terminology,
            &self.options,
        );

        let mut context = ContextValues::new();
        let mut outcome = ConversionOutcome::new(message.message_type(), &self.options.bundle_type);

        for binding in &template.resources {
            let Some(resource_template) = self.templates.resource(&binding.resource_name) else {
                error!(
                    "Message template {} names unknown resource template {}",
                    template.message_name, binding.resource_name
                );
                continue;
            };

            let path = binding.segment_path();
            let parent = binding.parent_group_path();
            let groups = extract_segment_groups(
                message,
                &path.segment,
                &path.group_path,
                &binding.additional_segment_paths(),
                parent.as_deref(),
            );
            debug!(
                "{}: {} segment groups for {}",
                binding.resource_name,
                groups.len(),
                binding.segment
            );

            let mut generated = Vec::new();
            let mut by_group: IndexMap<String, Vec<ResourceValue>> = IndexMap::new();

            'groups: for group in &groups {
                let group_context = bind_group(&context, group);
                for segment in group.segments() {
                    let base = Value::Segment(segment.clone());
                    let segment_context =
                        group_context.with(segment.name(), EvaluationResult::simple(base.clone()));

                    if let Some(result) =
                        resource_template.evaluate(&data_source, &segment_context, Some(&base))
                    {
                        let mut resource = result.resource;
                        if binding.is_referenced && resource.id().is_none() {
                            resource.set_id(Uuid::new_v4().to_string());
                        }
                        if let Some(group_id) = group.group_id() {
                            by_group
                                .entry(format!("{}_{}", binding.resource_name, group_id))
                                .or_default()
                                .push(resource.clone());
                        }
                        generated.push(resource);
                        outcome.additional_resources.extend(result.additional_resources);
                    }

                    if !binding.repeats {
                        break 'groups;
                    }
                }
            }

            if generated.is_empty() {
                debug!("No {} resources generated", binding.resource_name);
                continue;
            }
            context = store_generated(&context, binding, &generated, by_group);
            outcome.resources.extend(generated);
        }

        info!(
            "Converted {} into {} resources and {} additional resources",
            message.message_type(),
            outcome.resources.len(),
            outcome.additional_resources.len()
        );
        Ok(outcome)
    }
}

fn check_extra_segments(templates: &TemplateRegistry, options: &ConverterOptions) -> Result<()> {
    let declared: BTreeSet<&str> = options.extra_segments.iter().map(String::as_str).collect();
    let parsed: BTreeSet<&str> = templates.extra_segments().iter().map(String::as_str).collect();
    if declared == parsed {
        return Ok(());
    }
    Err(ConversionError::InvalidTemplate(format!(
        "Templates were parsed with extra segments {:?} but the options declare {:?}",
        parsed, declared
    )))
}

/// Binds the correlated peers and the group id of one segment group. Peers
/// absent from the group are bound as empty.
fn bind_group(context: &ContextValues, group: &SegmentGroup) -> ContextValues {
    let mut entries: Vec<(String, EvaluationResult)> = group
        .additional_segments()
        .iter()
        .map(|(name, segments)| {
            let result = match segments.as_slice() {
                [] => EvaluationResult::empty(),
                [single] => EvaluationResult::simple(Value::Segment(single.clone())),
                many => EvaluationResult::simple(Value::List(
                    many.iter().cloned().map(Value::Segment).collect(),
                )),
            };
            (name.clone(), result)
        })
        .collect();

    if let Some(group_id) = group.group_id() {
        entries.push((
            GROUP_ID_KEY.to_string(),
            EvaluationResult::simple(Value::from(group_id)),
        ));
    }
    context.extend(entries)
}

fn store_generated(
    context: &ContextValues,
    binding: &ResourceBinding,
    generated: &[ResourceValue],
    by_group: IndexMap<String, Vec<ResourceValue>>,
) -> ContextValues {
    let mut entries = vec![(
        binding.resource_name.clone(),
        EvaluationResult::simple(resources_value(generated.to_vec())),
    )];
    entries.extend(
        by_group
            .into_iter()
            .map(|(key, resources)| (key, EvaluationResult::simple(resources_value(resources)))),
    );
    context.extend(entries)
}

fn resources_value(mut resources: Vec<ResourceValue>) -> Value {
    if resources.len() == 1 {
        Value::Resource(resources.remove(0))
    } else {
        Value::List(resources.into_iter().map(Value::Resource).collect())
    }
}

/// The resources generated from one message
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    message_type: String,
    bundle_type: String,
    resources: Vec<ResourceValue>,
    additional_resources: Vec<ResourceValue>,
}

impl ConversionOutcome {
    fn new(message_type: &str, bundle_type: &str) -> Self {
        Self {
            message_type: message_type.to_string(),
            bundle_type: bundle_type.to_string(),
            resources: Vec::new(),
            additional_resources: Vec::new(),
        }
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Resources produced directly by the message template's bindings
    pub fn resources(&self) -> &[ResourceValue] {
        &self.resources
    }

    /// Resources emitted alongside, e.g. referenced practitioners
    pub fn additional_resources(&self) -> &[ResourceValue] {
        &self.additional_resources
    }

    /// Every resource, bound ones first
    pub fn all_resources(&self) -> impl Iterator<Item = &ResourceValue> {
        self.resources.iter().chain(self.additional_resources.iter())
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a ResourceValue> + 'a {
        self.all_resources()
            .filter(move |r| r.resource_type().as_deref() == Some(resource_type))
    }

    /// Renders a FHIR Bundle. Resources sharing a type and id appear once.
    pub fn to_bundle(&self) -> serde_json::Value {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for resource in self.all_resources() {
            let resource_type = resource
                .resource_type()
                .unwrap_or_else(|| resource.resource_class().to_string());
            let mut entry = serde_json::Map::new();
            if let Some(id) = resource.id() {
                if !seen.insert((resource_type.clone(), id.clone())) {
                    continue;
                }
                entry.insert(
                    "fullUrl".to_string(),
                    serde_json::Value::String(format!("{}/{}", resource_type, id)),
                );
            }
            entry.insert("resource".to_string(), resource.to_json());
            entries.push(serde_json::Value::Object(entry));
        }

        serde_json::json!({
            "resourceType": "Bundle",
            "id": Uuid::new_v4().to_string(),
            "type": self.bundle_type,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "entry": entries,
        })
    }
}

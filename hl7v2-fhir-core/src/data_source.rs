// Evaluation Data Source
//
// This module defines the boundary between the expression tree and everything it
// reads from: the parsed message, the script sandbox, the terminology service,
// the named templates and the converter options.

use crate::config::ConverterOptions;
use crate::context::ContextValues;
use crate::errors::Result;
use crate::resource::ResourceTemplate;
use crate::script::{Script, ScriptEngine};
use crate::specification::Hl7Specification;
use crate::template::TemplateRegistry;
use crate::terminology::TerminologyService;
use crate::value::{EvaluationResult, Value};
use hl7v2_model::Message;
use std::collections::HashMap;
use std::sync::Arc;

/// Source of values for expression evaluation
pub trait DataSource {
    /// Extracts the values an HL7 specification points at
    fn extract_value(
        &self,
        spec: &Hl7Specification,
        context: &ContextValues,
    ) -> Result<EvaluationResult>;

    /// Evaluates a sandboxed script
    fn evaluate_script(
        &self,
        script: &Script,
        variables: &HashMap<String, Value>,
    ) -> Result<Option<Value>>;

    /// Looks up a named resource or datatype template
    fn resource_template(&self, name: &str) -> Option<Arc<ResourceTemplate>>;

    fn terminology(&self) -> &TerminologyService;

    fn options(&self) -> &ConverterOptions;
}

/// Data source backed by one parsed HL7 message
pub struct Hl7DataSource<'a> {
    message: &'a Message,
    templates: &'a TemplateRegistry,
    scripts: &'a ScriptEngine,
    terminology: &'a TerminologyService,
    options: &'a ConverterOptions,
}

impl<'a> Hl7DataSource<'a> {
    pub fn new(
        message: &'a Message,
        templates: &'a TemplateRegistry,
        scripts: &'a ScriptEngine,
        terminology: &'a TerminologyService,
        options: &'a ConverterOptions,
    ) -> Self {
        Self {
            message,
            templates,
            scripts,
            terminology,
            options,
        }
    }

    pub fn message(&self) -> &Message {
        self.message
    }
}

impl DataSource for Hl7DataSource<'_> {
    fn extract_value(
        &self,
        spec: &Hl7Specification,
        context: &ContextValues,
    ) -> Result<EvaluationResult> {
        let mut values = spec.extract(self.message, context);
        Ok(if spec.extract_multiple {
            EvaluationResult::simple(Value::List(values))
        } else if values.is_empty() {
            EvaluationResult::empty()
        } else {
            EvaluationResult::simple(values.remove(0))
        })
    }

    fn evaluate_script(
        &self,
        script: &Script,
        variables: &HashMap<String, Value>,
    ) -> Result<Option<Value>> {
        self.scripts.evaluate_script(script, variables)
    }

    fn resource_template(&self, name: &str) -> Option<Arc<ResourceTemplate>> {
        self.templates.resource(name)
    }

    fn terminology(&self) -> &TerminologyService {
        self.terminology
    }

    fn options(&self) -> &ConverterOptions {
        self.options
    }
}

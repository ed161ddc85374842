// Variable Resolution Tests
//
// This file contains tests for the variable grammar and for resolving candidate
// specifications against the context and a data source.

use hl7v2_fhir_core::config::ConverterOptions;
use hl7v2_fhir_core::context::{ContextValues, GROUP_ID_KEY};
use hl7v2_fhir_core::data_source::DataSource;
use hl7v2_fhir_core::data_type::DataType;
use hl7v2_fhir_core::errors::{ConversionError, Result};
use hl7v2_fhir_core::resource::ResourceTemplate;
use hl7v2_fhir_core::script::{Script, ScriptEngine};
use hl7v2_fhir_core::specification::{Hl7Specification, Specification};
use hl7v2_fhir_core::terminology::TerminologyService;
use hl7v2_fhir_core::value::{EvaluationResult, Value};
use hl7v2_fhir_core::variable::{lookup_variable, parse_specs, resolve_specs, Variable};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Serves PID fields from a table and fails on any other field
struct TableDataSource {
    fields: HashMap<i32, &'static str>,
    calls: RefCell<Vec<String>>,
    scripts: ScriptEngine,
    terminology: TerminologyService,
    options: ConverterOptions,
}

impl TableDataSource {
    fn new(fields: &[(i32, &'static str)]) -> Self {
        Self {
            fields: fields.iter().cloned().collect(),
            calls: RefCell::new(Vec::new()),
            scripts: ScriptEngine::default(),
            terminology: TerminologyService::with_defaults(),
            options: ConverterOptions::default(),
        }
    }
}

impl DataSource for TableDataSource {
    fn extract_value(
        &self,
        spec: &Hl7Specification,
        _context: &ContextValues,
    ) -> Result<EvaluationResult> {
        self.calls.borrow_mut().push(spec.to_string());
        match self.fields.get(&spec.field) {
            Some(value) => Ok(EvaluationResult::simple(Value::from(*value))),
            None if spec.field == 99 => Err(ConversionError::EvaluationError(
                "field 99 must never be read".to_string(),
            )),
            None => Ok(EvaluationResult::empty()),
        }
    }

    fn evaluate_script(
        &self,
        script: &Script,
        variables: &HashMap<String, Value>,
    ) -> Result<Option<Value>> {
        self.scripts.evaluate_script(script, variables)
    }

    fn resource_template(&self, _name: &str) -> Option<Arc<ResourceTemplate>> {
        None
    }

    fn terminology(&self) -> &TerminologyService {
        &self.terminology
    }

    fn options(&self) -> &ConverterOptions {
        &self.options
    }
}

fn context(entries: &[(&str, Value)]) -> ContextValues {
    ContextValues::from_entries(
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), EvaluationResult::simple(value.clone()))),
    )
}

#[test]
fn test_typed_variable_with_extract_multiple() {
    match Variable::parse("values", "STRING, OBX-5 *").unwrap() {
        Variable::DataType { base, value_type } => {
            assert_eq!(value_type, DataType::String);
            assert_eq!(base.specs, vec!["OBX-5"]);
            assert!(base.extract_multiple);
            assert!(!base.combine_multiple);
        }
        other => panic!("Expected a typed variable, got {:?}", other),
    }
}

#[rstest]
#[case("")]
#[case("STRING,")]
#[case("UNKNOWN_TYPE, PID.3")]
#[case("PID.3 | ")]
#[case("PID.3, String.trim(x); String.trim(y)")]
fn test_malformed_variables(#[case] raw: &str) {
    assert!(Variable::parse("v", raw).is_err(), "{}", raw);
}

#[test]
fn test_first_non_empty_spec_wins() {
    let source = TableDataSource::new(&[(3, "PA123")]);
    let specs = parse_specs(
        &["PID.2".to_string(), "PID.3".to_string(), "PID.99".to_string()],
        false,
        false,
        &[],
    );

    let result = resolve_specs(&specs, &source, &ContextValues::new(), false).unwrap();
    assert_eq!(result.value(), Some(&Value::from("PA123")));
    assert_eq!(*source.calls.borrow(), vec!["PID.2", "PID.3"]);
}

#[test]
fn test_later_specs_are_evaluated_when_earlier_are_empty() {
    let source = TableDataSource::new(&[]);
    let specs = parse_specs(&["PID.2".to_string(), "PID.99".to_string()], false, false, &[]);
    let result = resolve_specs(&specs, &source, &ContextValues::new(), false);
    assert!(matches!(result, Err(ConversionError::EvaluationError(_))));
}

#[test]
fn test_combine_joins_with_space() {
    let source = TableDataSource::new(&[(5, " JOHN "), (6, "A")]);
    let variable = Variable::parse("given", "PID.5 | PID.4 | PID.6 +").unwrap();
    let result = variable
        .evaluate(&source, &ContextValues::new(), false)
        .unwrap();
    assert_eq!(result.value(), Some(&Value::from("JOHN A")));
}

#[test]
fn test_context_variable_before_message() {
    let source = TableDataSource::new(&[(3, "from-message")]);
    let variable = Variable::parse("id", "$override | PID.3").unwrap();

    let result = variable
        .evaluate(&source, &context(&[("override", Value::from("from-context"))]), false)
        .unwrap();
    assert_eq!(result.value(), Some(&Value::from("from-context")));

    let result = variable.evaluate(&source, &ContextValues::new(), false).unwrap();
    assert_eq!(result.value(), Some(&Value::from("from-message")));
}

#[test]
fn test_expression_variable_binds_own_name() {
    let source = TableDataSource::new(&[(8, "m")]);
    let variable = Variable::parse("gender", "PID.8, String.toUpperCase(gender)").unwrap();
    let result = variable.evaluate(&source, &ContextValues::new(), false).unwrap();
    assert_eq!(result.value(), Some(&Value::from("M")));
}

#[test]
fn test_typed_variable_coerces_each_item() {
    let source = TableDataSource::new(&[]);
    let variable = Variable::parse("counts", "INTEGER, $raw").unwrap();
    let ctx = context(&[(
        "raw",
        Value::List(vec![Value::from("1"), Value::from("x"), Value::from("3")]),
    )]);
    let result = variable.evaluate(&source, &ctx, false).unwrap();
    assert_eq!(
        result.value(),
        Some(&Value::List(vec![Value::Integer(1), Value::Integer(3)]))
    );
}

fn simple(raw: &str, use_group: bool) -> hl7v2_fhir_core::specification::SimpleSpecification {
    match Specification::parse(raw, false, use_group) {
        Specification::Simple(spec) => spec,
        other => panic!("Expected simple specification, got {:?}", other),
    }
}

#[test]
fn test_group_scoped_lookup_precedes_bare_key() {
    let ctx = context(&[
        ("obs", Value::from("bare")),
        ("obs_G1", Value::from("grouped")),
        (GROUP_ID_KEY, Value::from("G1")),
    ]);
    assert_eq!(lookup_variable(&simple("$obs", true), &ctx), Some(Value::from("grouped")));
    assert_eq!(lookup_variable(&simple("$obs", false), &ctx), Some(Value::from("bare")));

    let other_group = ctx.with(GROUP_ID_KEY, EvaluationResult::simple(Value::from("G2")));
    assert_eq!(
        lookup_variable(&simple("$obs", true), &other_group),
        Some(Value::from("bare"))
    );
}

#[test]
fn test_fuzzy_lookup_collects_prefixed_keys() {
    let ctx = context(&[
        ("obs_G2", Value::from("second")),
        ("obs_G1", Value::from("first")),
        ("other", Value::from("ignored")),
        ("obsEmpty", Value::from("")),
    ]);
    assert_eq!(
        lookup_variable(&simple("$obs?", false), &ctx),
        Some(Value::List(vec![Value::from("first"), Value::from("second")]))
    );
}

#[test]
fn test_subfield_lookup() {
    let ctx = context(&[(
        "coding",
        Value::Json(serde_json::json!({ "code": "718-7", "system": "http://loinc.org" })),
    )]);
    assert_eq!(
        lookup_variable(&simple("$coding:code", false), &ctx),
        Some(Value::from("718-7"))
    );
    assert_eq!(lookup_variable(&simple("$coding:display", false), &ctx), None);
}

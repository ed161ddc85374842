// Resource Template Tests
//
// This file contains tests for evaluating resource templates field by field.

use hl7v2_fhir_core::config::ConverterOptions;
use hl7v2_fhir_core::context::{ContextValues, GROUP_ID_KEY};
use hl7v2_fhir_core::data_source::Hl7DataSource;
use hl7v2_fhir_core::errors::ConversionError;
use hl7v2_fhir_core::resource::ResourceTemplate;
use hl7v2_fhir_core::script::ScriptEngine;
use hl7v2_fhir_core::template::TemplateRegistry;
use hl7v2_fhir_core::terminology::TerminologyService;
use hl7v2_fhir_core::value::{EvaluationResult, Value};
use hl7v2_model::{parse_message, Message};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::Path;

fn load_message(name: &str) -> Message {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    let text = fs::read_to_string(path).expect("Failed to read fixture file");
    parse_message(&text).expect("Failed to parse fixture message")
}

struct Harness {
    message: Message,
    registry: TemplateRegistry,
    scripts: ScriptEngine,
    terminology: TerminologyService,
    options: ConverterOptions,
}

impl Harness {
    fn new(templates: &[(&str, &str)]) -> Self {
        let mut registry = TemplateRegistry::new();
        for (name, yaml) in templates {
            registry.add_resource_yaml(name, yaml).unwrap();
        }
        Self {
            message: load_message("adt_a01.hl7"),
            registry,
            scripts: ScriptEngine::default(),
            terminology: TerminologyService::with_defaults(),
            options: ConverterOptions::default(),
        }
    }

    fn data_source(&self) -> Hl7DataSource<'_> {
        Hl7DataSource::new(
            &self.message,
            &self.registry,
            &self.scripts,
            &self.terminology,
            &self.options,
        )
    }

    fn pid_context(&self) -> (ContextValues, Value) {
        let pid = Value::Segment(self.message.find_segments("PID").remove(0));
        let context = ContextValues::new().with("PID", EvaluationResult::simple(pid.clone()));
        (context, pid)
    }

    fn evaluate(&self, name: &str) -> Option<serde_json::Value> {
        let template = self.registry.resource(name).unwrap();
        let (context, pid) = self.pid_context();
        template
            .evaluate(&self.data_source(), &context, Some(&pid))
            .map(|result| result.resource.to_json())
    }
}

#[test]
fn test_null_fields_are_pruned() {
    let harness = Harness::new(&[(
        "Patient",
        r#"
resourceType: Patient
missing:
  type: STRING
  spec: PID.99
nothing: null
blank: "  "
empty:
  type: INTEGER
  spec: PID.5.1
gender:
  type: ADMINISTRATIVE_GENDER
  spec: PID.8
"#,
    )]);

    assert_eq!(
        harness.evaluate("Patient"),
        Some(json!({ "resourceType": "Patient", "gender": "male" }))
    );
}

#[test]
fn test_id_is_visible_to_later_fields() {
    let harness = Harness::new(&[(
        "Patient",
        r#"
resourceType: Patient
link:
  fetch: $Patient_id
id:
  type: STRING
  spec: PID.3.1
"#,
    )]);

    let patient = harness.evaluate("Patient").unwrap();
    assert_eq!(patient["id"], json!("PA123456"));
    assert_eq!(patient["link"], json!("PA123456"));
    let keys: Vec<&String> = patient.as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["resourceType", "id", "link"]);
}

#[test]
fn test_required_field_skips_resource() {
    let harness = Harness::new(&[(
        "Patient",
        r#"
resourceType: Patient
gender:
  type: ADMINISTRATIVE_GENDER
  spec: PID.8
deceased:
  type: BOOLEAN
  spec: PID.30
  required: true
"#,
    )]);
    assert_eq!(harness.evaluate("Patient"), None);
}

#[test]
fn test_required_default_satisfies_constraint() {
    let harness = Harness::new(&[(
        "Patient",
        r#"
resourceType: Patient
deceasedBoolean:
  type: BOOLEAN
  spec: PID.30
  required: true
  default: false
"#,
    )]);
    assert_eq!(
        harness.evaluate("Patient"),
        Some(json!({ "resourceType": "Patient", "deceasedBoolean": false }))
    );
}

#[test]
fn test_required_failure_is_contained_in_nested_template() {
    let harness = Harness::new(&[
        (
            "Patient",
            r#"
resourceType: Patient
contact:
  resource: Contact
gender:
  type: ADMINISTRATIVE_GENDER
  spec: PID.8
"#,
        ),
        (
            "Contact",
            r#"
name:
  type: STRING
  spec: NK1.99
  required: true
"#,
        ),
    ]);
    assert_eq!(
        harness.evaluate("Patient"),
        Some(json!({ "resourceType": "Patient", "gender": "male" }))
    );
}

#[test]
fn test_unknown_nested_template_returns_none() {
    let harness = Harness::new(&[(
        "Patient",
        "resourceType: Patient\ncontact:\n  resource: Missing\n",
    )]);
    assert_eq!(harness.evaluate("Patient"), None);
}

#[test]
fn test_generate_list_and_nested_datatypes() {
    let harness = Harness::new(&[
        (
            "Patient",
            r#"
resourceType: Patient
identifier:
  resource: Identifier
  specs: PID.3 *
"#,
        ),
        (
            "Identifier",
            r#"
value:
  type: STRING
  spec: CX.1
system:
  evaluate: String.concat('urn:id:', authority)
  vars:
    authority: CX.4
  condition: $authority NOT_NULL
"#,
        ),
    ]);

    assert_eq!(
        harness.evaluate("Patient").unwrap()["identifier"],
        json!([
            { "value": "PA123456", "system": "urn:id:MYEMR" },
            { "value": "111-22-3333", "system": "urn:id:USSSA" }
        ])
    );
}

#[test]
fn test_condition_gates_field() {
    let harness = Harness::new(&[(
        "Patient",
        r#"
resourceType: Patient
male:
  value: true
  vars:
    sex: PID.8
  condition: $sex EQUALS M
female:
  value: true
  vars:
    sex: PID.8
  condition: $sex EQUALS F
  required: true
"#,
    )]);

    let patient = harness.evaluate("Patient").unwrap();
    assert_eq!(patient["male"], json!(true));
    assert!(patient.get("female").is_none());
}

#[test]
fn test_constants_are_visible_to_scripts() {
    let harness = Harness::new(&[(
        "Patient",
        r#"
resourceType: Patient
system:
  evaluate: String.concat(prefix, mrn)
  constants:
    prefix: "urn:mrn:"
  vars:
    mrn: PID.3.1
"#,
    )]);
    assert_eq!(
        harness.evaluate("Patient").unwrap()["system"],
        json!("urn:mrn:PA123456")
    );
}

#[test]
fn test_key_name_suffix_and_list_merge() {
    let harness = Harness::new(&[(
        "Bundle",
        r#"
names:
  value: [first]
names_KEY_NAME_SUFFIX:
  type: STRING
  spec: PID.5.2
"#,
    )]);
    let template = harness.registry.resource("Bundle").unwrap();
    let (context, pid) = harness.pid_context();
    let data_source = harness.data_source();

    let merged = template.evaluate(&data_source, &context, Some(&pid)).unwrap();
    assert_eq!(
        merged.resource.get("names"),
        Some(&Value::List(vec![Value::from("first"), Value::from("JOHN")]))
    );

    let grouped = context.with(GROUP_ID_KEY, EvaluationResult::simple(Value::from("G7")));
    let keyed = template.evaluate(&data_source, &grouped, Some(&pid)).unwrap();
    assert_eq!(keyed.resource.get("names_G7").and_then(Value::as_text).as_deref(), Some("JOHN"));
}

#[test]
fn test_reference_emits_additional_resource() {
    let harness = Harness::new(&[
        (
            "Encounter",
            r#"
resourceType: Encounter
participant:
  reference: Practitioner
  specs: PV1.7
"#,
        ),
        (
            "Practitioner",
            r#"
resourceType: Practitioner
id:
  type: STRING
  spec: XCN.1
family:
  type: STRING
  spec: XCN.2
"#,
        ),
    ]);
    let template = harness.registry.resource("Encounter").unwrap();
    let result = template
        .evaluate(&harness.data_source(), &ContextValues::new(), None)
        .unwrap();

    assert_eq!(
        result.resource.to_json()["participant"],
        json!({ "reference": "Practitioner/1234" })
    );
    assert_eq!(result.additional_resources.len(), 1);
    assert_eq!(
        result.additional_resources[0].to_json(),
        json!({ "resourceType": "Practitioner", "id": "1234", "family": "SMITH" })
    );
}

#[test]
fn test_reference_without_id_gets_one() {
    let harness = Harness::new(&[
        (
            "Encounter",
            "resourceType: Encounter\nlocation:\n  reference: Location\n",
        ),
        (
            "Location",
            "resourceType: Location\nname:\n  type: STRING\n  spec: PV1.3.1\n",
        ),
    ]);
    let template = harness.registry.resource("Encounter").unwrap();
    let result = template
        .evaluate(&harness.data_source(), &ContextValues::new(), None)
        .unwrap();

    let location = &result.additional_resources[0];
    let id = location.id().unwrap();
    assert_eq!(
        result.resource.to_json()["location"],
        json!({ "reference": format!("Location/{}", id) })
    );
}

#[test]
fn test_template_errors_fail_at_load() {
    let mut registry = TemplateRegistry::new();
    assert!(matches!(
        registry.add_resource_yaml("Bad", "status:\n  condition: $x BOGUS y\n"),
        Err(ConversionError::MalformedCondition(_))
    ));
    assert!(matches!(
        registry.add_resource_yaml("Bad", "status:\n  evaluate: System.exit(1);\n"),
        Err(ConversionError::IllegalExpression(_))
    ));
    assert!(matches!(
        registry.add_resource_yaml("Bad", "status:\n  type: NOT_A_TYPE\n  spec: PID.1\n"),
        Err(ConversionError::InvalidTemplate(_))
    ));
    assert!(matches!(
        ResourceTemplate::from_yaml_str("Bad", "status:\n  vars:\n    v: 'STRING, '\n"),
        Err(ConversionError::MalformedVariable(_))
    ));
}

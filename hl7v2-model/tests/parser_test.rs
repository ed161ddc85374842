// HL7v2 Parser Tests
//
// This file contains tests for the wire parser and the group assembly.

use hl7v2_model::{parse_message, Element, Hl7Error, Structure, StructurePath};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::fs;
use std::path::Path;

fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    fs::read_to_string(path).expect("Failed to read fixture file")
}

#[test]
fn test_message_type_and_structure() {
    let message = parse_message(&load_fixture("adt_a01.hl7")).unwrap();
    assert_eq!(message.message_type(), "ADT_A01");
    assert_eq!(message.structure_name(), "ADT_A01");

    let message = parse_message(&load_fixture("oru_r01.hl7")).unwrap();
    assert_eq!(message.message_type(), "ORU_R01");
    assert_eq!(message.structure_name(), "ORU_R01");
}

#[test]
fn test_msh_fields_are_not_split() {
    let message = parse_message(&load_fixture("adt_a01.hl7")).unwrap();
    let msh = &message.find_segments("MSH")[0].segment;
    assert_eq!(msh.field(1).unwrap().first().unwrap().text(), "|");
    assert_eq!(msh.field(2).unwrap().first().unwrap().text(), "^~\\&");
    assert_eq!(msh.field(10).unwrap().first().unwrap().text(), "MSG00001");
}

#[test]
fn test_field_repetitions_and_components() {
    let message = parse_message(&load_fixture("adt_a01.hl7")).unwrap();
    let pid = &message.find_segments("PID")[0].segment;
    let identifiers = pid.field(3).unwrap();
    assert_eq!(identifiers.repetitions.len(), 2);
    assert_eq!(identifiers.repetition(1).unwrap().part(1).unwrap().text(), "111-22-3333");
    assert_eq!(identifiers.repetition(0).unwrap().part(5).unwrap().text(), "MR");

    let name = pid.field(5).unwrap().first().unwrap();
    assert_eq!(name.part(1).map(Element::text), Some("DOE"));
    assert_eq!(name.part(2).map(Element::text), Some("JOHN"));
    assert_eq!(name.text(), "DOE");
}

#[test]
fn test_adt_groups() {
    let message = parse_message(&load_fixture("adt_a01.hl7")).unwrap();
    let root = message.root();
    assert_eq!(root.segments("NK1").len(), 2);
    assert_eq!(root.groups("PROCEDURE").len(), 2);

    let second = message
        .group_at(&StructurePath::root().child("PROCEDURE", 1))
        .unwrap();
    let rol = second.segments("ROL");
    assert_eq!(rol.len(), 1);
    assert_eq!(rol[0].field(4).unwrap().first().unwrap().text(), "5432");

    // Z-segments stay with the group they follow
    assert_eq!(second.segments("ZPD").len(), 1);
}

#[test]
fn test_oru_groups() {
    let message = parse_message(&load_fixture("oru_r01.hl7")).unwrap();
    let patient_result = StructurePath::root().child("PATIENT_RESULT", 0);
    let result_group = message.group_at(&patient_result).unwrap();
    assert_eq!(result_group.groups("ORDER_OBSERVATION").len(), 2);
    assert_eq!(result_group.groups("PATIENT").len(), 1);

    let first_order = patient_result.child("ORDER_OBSERVATION", 0);
    let observations = message.group_at(&first_order).unwrap().groups("OBSERVATION");
    assert_eq!(observations.len(), 2);
    assert_eq!(observations[0].segments("NTE").len(), 1);

    let visit = patient_result.child("PATIENT", 0).child("VISIT", 0);
    assert_eq!(message.segments_in(&visit, "PV1").unwrap().len(), 1);
}

#[test]
fn test_find_segments_reports_paths() {
    let message = parse_message(&load_fixture("oru_r01.hl7")).unwrap();
    let found = message.find_segments("OBX");
    assert_eq!(found.len(), 3);
    assert_eq!(
        found[2].path.to_string(),
        "/PATIENT_RESULT[0]/ORDER_OBSERVATION[1]/OBSERVATION[0]/OBX[0]"
    );
    assert_eq!(found[1].group_path().names(), vec!["PATIENT_RESULT", "ORDER_OBSERVATION", "OBSERVATION"]);
}

#[test]
fn test_unknown_structure_stays_flat() {
    let text = "MSH|^~\\&|A|B|C|D|20240101||QRY^Q01|1|P|2.5\rPID|1||X\rZZZ|1";
    let message = parse_message(text).unwrap();
    assert_eq!(message.message_type(), "QRY_Q01");
    assert_eq!(message.root().children.len(), 3);
    assert!(matches!(message.root().children[2], Structure::Segment(_)));
}

#[test]
fn test_navigation_error_for_missing_repetition() {
    let message = parse_message(&load_fixture("adt_a01.hl7")).unwrap();
    let result = message.group_at(&StructurePath::root().child("PROCEDURE", 5));
    assert!(matches!(result, Err(Hl7Error::NavigationError(_))));
}

#[rstest]
#[case("", "Empty message")]
#[case("PID|1||X", "First segment must be MSH")]
fn test_invalid_messages(#[case] input: &str, #[case] expected: &str) {
    match parse_message(input) {
        Err(Hl7Error::InvalidStructure(message)) => assert_eq!(message, expected),
        other => panic!("Expected InvalidStructure, got {:?}", other),
    }
}

#[test]
fn test_invalid_segment_name() {
    let text = "MSH|^~\\&|A|B|C|D|20240101||ADT^A01|1|P|2.5\rpid|1";
    assert!(matches!(parse_message(text), Err(Hl7Error::ParseError(_))));
}

#[test]
fn test_segment_serializes_to_json() {
    let message = parse_message(&load_fixture("oru_r01.hl7")).unwrap();
    let obr = &message.find_segments("OBR")[0].segment;
    let json = serde_json::to_value(obr.as_ref()).unwrap();
    assert_eq!(json["name"], "OBR");
}

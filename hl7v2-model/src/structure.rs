// HL7v2 Message Structures
//
// This module holds the group definitions for the supported message structures and
// assembles a flat segment list into the nested group tree those definitions describe.

use crate::message::{Group, Segment, Structure};
use log::debug;
use std::sync::Arc;

/// How often a child may occur inside its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Required,
    Optional,
    Repeating,
    OptionalRepeating,
}

impl Cardinality {
    pub fn is_required(self) -> bool {
        matches!(self, Cardinality::Required | Cardinality::Repeating)
    }

    pub fn is_repeating(self) -> bool {
        matches!(self, Cardinality::Repeating | Cardinality::OptionalRepeating)
    }
}

/// One entry of a group definition
#[derive(Debug, Clone, PartialEq)]
pub enum ChildDefinition {
    Segment {
        name: String,
        cardinality: Cardinality,
    },
    Group {
        definition: GroupDefinition,
        cardinality: Cardinality,
    },
}

impl ChildDefinition {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            ChildDefinition::Segment { cardinality, .. } => *cardinality,
            ChildDefinition::Group { cardinality, .. } => *cardinality,
        }
    }

    /// Segment names that can open this child
    pub fn first_set(&self) -> Vec<&str> {
        match self {
            ChildDefinition::Segment { name, .. } => vec![name.as_str()],
            ChildDefinition::Group { definition, .. } => definition.first_set(),
        }
    }
}

/// Definition of a group: its name and ordered children
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDefinition {
    pub name: String,
    pub children: Vec<ChildDefinition>,
}

impl GroupDefinition {
    pub fn new(name: impl Into<String>, children: Vec<ChildDefinition>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    /// Segment names that can open an instance of this group: the first sets of the
    /// leading children up to and including the first required one
    pub fn first_set(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for child in &self.children {
            names.extend(child.first_set());
            if child.cardinality().is_required() {
                break;
            }
        }
        names
    }

    fn find_child(&self, from: usize, segment: &str) -> Option<usize> {
        (from..self.children.len()).find(|&k| self.children[k].first_set().contains(&segment))
    }
}

fn seg(name: &str, cardinality: Cardinality) -> ChildDefinition {
    ChildDefinition::Segment {
        name: name.to_string(),
        cardinality,
    }
}

fn grp(name: &str, cardinality: Cardinality, children: Vec<ChildDefinition>) -> ChildDefinition {
    ChildDefinition::Group {
        definition: GroupDefinition::new(name, children),
        cardinality,
    }
}

use Cardinality::{Optional as O, OptionalRepeating as OR, Repeating as RR, Required as R};

fn adt_a01() -> GroupDefinition {
    GroupDefinition::new(
        "ADT_A01",
        vec![
            seg("MSH", R),
            seg("SFT", OR),
            seg("EVN", R),
            seg("PID", R),
            seg("PD1", O),
            seg("ROL", OR),
            seg("NK1", OR),
            seg("PV1", R),
            seg("PV2", O),
            seg("ROL", OR),
            seg("DB1", OR),
            seg("OBX", OR),
            seg("AL1", OR),
            seg("DG1", OR),
            seg("DRG", O),
            grp("PROCEDURE", OR, vec![seg("PR1", R), seg("ROL", OR)]),
            seg("GT1", OR),
            grp(
                "INSURANCE",
                OR,
                vec![seg("IN1", R), seg("IN2", O), seg("IN3", OR), seg("ROL", OR)],
            ),
            seg("ACC", O),
            seg("UB1", O),
            seg("UB2", O),
            seg("PDA", O),
        ],
    )
}

fn oru_r01() -> GroupDefinition {
    GroupDefinition::new(
        "ORU_R01",
        vec![
            seg("MSH", R),
            seg("SFT", OR),
            grp(
                "PATIENT_RESULT",
                RR,
                vec![
                    grp(
                        "PATIENT",
                        O,
                        vec![
                            seg("PID", R),
                            seg("PD1", O),
                            seg("NTE", OR),
                            seg("NK1", OR),
                            grp("VISIT", O, vec![seg("PV1", R), seg("PV2", O)]),
                        ],
                    ),
                    grp(
                        "ORDER_OBSERVATION",
                        RR,
                        vec![
                            seg("ORC", O),
                            seg("OBR", R),
                            seg("NTE", OR),
                            grp("TIMING_QTY", OR, vec![seg("TQ1", R), seg("TQ2", OR)]),
                            seg("CTD", O),
                            grp("OBSERVATION", OR, vec![seg("OBX", R), seg("NTE", OR)]),
                            seg("FT1", OR),
                            seg("CTI", OR),
                            grp("SPECIMEN", OR, vec![seg("SPM", R), seg("OBX", OR)]),
                        ],
                    ),
                ],
            ),
            seg("DSC", O),
        ],
    )
}

fn vxu_v04() -> GroupDefinition {
    GroupDefinition::new(
        "VXU_V04",
        vec![
            seg("MSH", R),
            seg("SFT", OR),
            seg("PID", R),
            seg("PD1", O),
            seg("NK1", OR),
            grp("PATIENT", O, vec![seg("PV1", R), seg("PV2", O)]),
            seg("GT1", OR),
            grp(
                "INSURANCE",
                OR,
                vec![seg("IN1", R), seg("IN2", O), seg("IN3", O)],
            ),
            grp(
                "ORDER",
                OR,
                vec![
                    seg("ORC", R),
                    grp("TIMING", OR, vec![seg("TQ1", R), seg("TQ2", OR)]),
                    seg("RXA", R),
                    seg("RXR", O),
                    grp("OBSERVATION", OR, vec![seg("OBX", R), seg("NTE", OR)]),
                ],
            ),
        ],
    )
}

fn orm_o01() -> GroupDefinition {
    GroupDefinition::new(
        "ORM_O01",
        vec![
            seg("MSH", R),
            seg("NTE", OR),
            grp(
                "PATIENT",
                O,
                vec![
                    seg("PID", R),
                    seg("PD1", O),
                    seg("NTE", OR),
                    grp("PATIENT_VISIT", O, vec![seg("PV1", R), seg("PV2", O)]),
                    grp(
                        "INSURANCE",
                        OR,
                        vec![seg("IN1", R), seg("IN2", O), seg("IN3", O)],
                    ),
                    seg("GT1", O),
                    seg("AL1", OR),
                ],
            ),
            grp(
                "ORDER",
                RR,
                vec![
                    seg("ORC", R),
                    grp(
                        "ORDER_DETAIL",
                        O,
                        vec![
                            seg("OBR", R),
                            seg("NTE", OR),
                            seg("DG1", OR),
                            grp("OBSERVATION", OR, vec![seg("OBX", R), seg("NTE", OR)]),
                        ],
                    ),
                    seg("FT1", OR),
                    seg("BLG", O),
                ],
            ),
        ],
    )
}

fn mdm_t02() -> GroupDefinition {
    GroupDefinition::new(
        "MDM_T02",
        vec![
            seg("MSH", R),
            seg("SFT", OR),
            seg("EVN", R),
            seg("PID", R),
            seg("PV1", R),
            grp(
                "COMMON_ORDER",
                OR,
                vec![
                    seg("ORC", R),
                    grp("TIMING", OR, vec![seg("TQ1", R), seg("TQ2", OR)]),
                    seg("OBR", R),
                    seg("NTE", OR),
                ],
            ),
            seg("TXA", R),
            seg("CON", OR),
            grp("OBSERVATION", OR, vec![seg("OBX", R), seg("NTE", OR)]),
        ],
    )
}

/// Returns the structure name used for a message type, e.g. `ADT_A04` → `ADT_A01`
pub fn structure_for(message_type: &str) -> Option<&'static str> {
    match message_type {
        "ADT_A01" | "ADT_A02" | "ADT_A03" | "ADT_A04" | "ADT_A05" | "ADT_A06" | "ADT_A07"
        | "ADT_A08" | "ADT_A13" | "ADT_A14" | "ADT_A28" | "ADT_A31" => Some("ADT_A01"),
        "ORU_R01" => Some("ORU_R01"),
        "VXU_V04" => Some("VXU_V04"),
        "ORM_O01" => Some("ORM_O01"),
        "MDM_T02" | "MDM_T06" => Some("MDM_T02"),
        _ => None,
    }
}

/// Returns the group definition for a structure name
pub fn definition_for(structure_name: &str) -> Option<GroupDefinition> {
    match structure_name {
        "ADT_A01" => Some(adt_a01()),
        "ORU_R01" => Some(oru_r01()),
        "VXU_V04" => Some(vxu_v04()),
        "ORM_O01" => Some(orm_o01()),
        "MDM_T02" => Some(mdm_t02()),
        _ => None,
    }
}

/// Builds the group tree for a flat segment list.
///
/// Unknown structures keep every segment at the root. With a definition, segments are
/// placed greedily: each segment goes to the first child at or after the current
/// position whose first set contains it. A segment that fits nowhere in the current
/// group closes that group, except for Z-segments, which stay with the group they
/// follow, and for the root, which keeps everything left over.
pub fn assemble(structure_name: &str, segments: Vec<Segment>) -> Group {
    let segments: Vec<Arc<Segment>> = segments.into_iter().map(Arc::new).collect();
    let mut root = Group::new(structure_name);

    match definition_for(structure_name) {
        Some(definition) => {
            let mut position = 0;
            fill_group(&definition, &mut root, &segments, &mut position, true);
        }
        None => {
            debug!(
                "No structure definition for {}, keeping segments ungrouped",
                structure_name
            );
            for segment in segments {
                root.push(Structure::Segment(segment));
            }
        }
    }

    root
}

fn fill_group(
    definition: &GroupDefinition,
    group: &mut Group,
    segments: &[Arc<Segment>],
    position: &mut usize,
    is_root: bool,
) {
    let mut index = 0;

    while *position < segments.len() {
        let segment = &segments[*position];

        match definition.find_child(index, &segment.name) {
            Some(k) => {
                let child = &definition.children[k];
                match child {
                    ChildDefinition::Segment { .. } => {
                        group.push(Structure::Segment(Arc::clone(segment)));
                        *position += 1;
                    }
                    ChildDefinition::Group {
                        definition: child_definition,
                        ..
                    } => {
                        let mut inner = Group::new(child_definition.name.clone());
                        fill_group(child_definition, &mut inner, segments, position, false);
                        group.push(Structure::Group(inner));
                    }
                }
                index = if child.cardinality().is_repeating() {
                    k
                } else {
                    k + 1
                };
            }
            None if is_root || segment.name.starts_with('Z') => {
                debug!(
                    "Segment {} is not expected here, attaching it to {}",
                    segment.name, group.name
                );
                group.push(Structure::Segment(Arc::clone(segment)));
                *position += 1;
            }
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_set_stops_at_required_child() {
        let definition = oru_r01();
        let patient_result = match &definition.children[2] {
            ChildDefinition::Group { definition, .. } => definition,
            _ => panic!("Expected PATIENT_RESULT group"),
        };
        assert_eq!(patient_result.first_set(), vec!["PID", "ORC", "OBR"]);
    }

    #[test]
    fn test_adt_aliases() {
        assert_eq!(structure_for("ADT_A04"), Some("ADT_A01"));
        assert_eq!(structure_for("ADT_A08"), Some("ADT_A01"));
        assert_eq!(structure_for("XYZ_Q99"), None);
    }
}

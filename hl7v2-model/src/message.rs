// HL7v2 Message Model
//
// This module defines the navigable message tree: elements, fields, segments, groups
// and the paths used to locate a structure instance inside a message.

use crate::errors::{Hl7Error, Result};
use crate::parser::Delimiters;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One value inside a field: a repetition, a component or a subcomponent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    /// Leaf value
    Primitive(String),

    /// Value with separated parts (components of a repetition, subcomponents of a component)
    Composite(Vec<Element>),
}

impl Element {
    /// Returns the 1-based part of this element.
    ///
    /// A primitive answers its first part with itself, so `CX.1` works on a field that
    /// only carries an identifier value.
    pub fn part(&self, index: usize) -> Option<&Element> {
        if index == 0 {
            return None;
        }
        match self {
            Element::Primitive(_) if index == 1 => Some(self),
            Element::Primitive(_) => None,
            Element::Composite(parts) => parts.get(index - 1),
        }
    }

    /// Number of parts addressable through [`Element::part`]
    pub fn len(&self) -> usize {
        match self {
            Element::Primitive(_) => 1,
            Element::Composite(parts) => parts.len(),
        }
    }

    /// Text of the element; composites render as their first part
    pub fn text(&self) -> &str {
        match self {
            Element::Primitive(value) => value,
            Element::Composite(parts) => parts.first().map(|p| p.text()).unwrap_or(""),
        }
    }

    /// All leaf values in document order
    pub fn primitives(&self) -> Vec<&str> {
        match self {
            Element::Primitive(value) => vec![value.as_str()],
            Element::Composite(parts) => parts.iter().flat_map(|p| p.primitives()).collect(),
        }
    }

    /// True when every leaf is blank
    pub fn is_empty(&self) -> bool {
        self.primitives().iter().all(|p| p.trim().is_empty())
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// A segment field with its repetitions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Field {
    pub repetitions: Vec<Element>,
}

impl Field {
    pub fn new(repetitions: Vec<Element>) -> Self {
        Self { repetitions }
    }

    /// Creates a single-repetition field holding one primitive value
    pub fn primitive(value: impl Into<String>) -> Self {
        Self {
            repetitions: vec![Element::Primitive(value.into())],
        }
    }

    /// Returns the first repetition
    pub fn first(&self) -> Option<&Element> {
        self.repetitions.first()
    }

    /// Returns the 0-based repetition
    pub fn repetition(&self, index: usize) -> Option<&Element> {
        self.repetitions.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.repetitions.iter().all(Element::is_empty)
    }
}

/// A named segment such as PID or OBX
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Segment {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Returns the 1-based field
    pub fn field(&self, index: usize) -> Option<&Field> {
        if index == 0 {
            None
        } else {
            self.fields.get(index - 1)
        }
    }
}

/// A child of a group
#[derive(Debug, Clone, PartialEq)]
pub enum Structure {
    Segment(Arc<Segment>),
    Group(Group),
}

impl Structure {
    pub fn name(&self) -> &str {
        match self {
            Structure::Segment(segment) => &segment.name,
            Structure::Group(group) => &group.name,
        }
    }
}

/// A named, possibly repeating container of segments and groups
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub children: Vec<Structure>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn push(&mut self, child: Structure) {
        self.children.push(child);
    }

    /// All children with the given name, in order. The position in the returned
    /// list is the repetition index.
    pub fn get_all(&self, name: &str) -> Vec<&Structure> {
        self.children.iter().filter(|c| c.name() == name).collect()
    }

    /// All repetitions of a directly contained segment
    pub fn segments(&self, name: &str) -> Vec<&Arc<Segment>> {
        self.children
            .iter()
            .filter_map(|c| match c {
                Structure::Segment(segment) if segment.name == name => Some(segment),
                _ => None,
            })
            .collect()
    }

    /// All repetitions of a directly contained group
    pub fn groups(&self, name: &str) -> Vec<&Group> {
        self.children
            .iter()
            .filter_map(|c| match c {
                Structure::Group(group) if group.name == name => Some(group),
                _ => None,
            })
            .collect()
    }

    /// Returns the given repetition of a named child
    pub fn child(&self, name: &str, repetition: usize) -> Option<&Structure> {
        self.get_all(name).into_iter().nth(repetition)
    }
}

/// One step of a structure path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathStep {
    pub name: String,
    pub repetition: usize,
}

/// Location of a structure instance, relative to the message root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StructurePath {
    steps: Vec<PathStep>,
}

impl StructurePath {
    /// The message root
    pub fn root() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns a new path one level below this one
    pub fn child(&self, name: &str, repetition: usize) -> Self {
        let mut steps = self.steps.clone();
        steps.push(PathStep {
            name: name.to_string(),
            repetition,
        });
        Self { steps }
    }

    /// Returns the enclosing path, or the root for the root itself
    pub fn parent(&self) -> Self {
        self.truncate(self.steps.len().saturating_sub(1))
    }

    /// Returns the ancestor with `len` steps
    pub fn truncate(&self, len: usize) -> Self {
        Self {
            steps: self.steps[..len.min(self.steps.len())].to_vec(),
        }
    }

    /// Names along the path, outermost first
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }
}

impl fmt::Display for StructurePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}[{}]", s.name, s.repetition))
            .collect();
        write!(f, "/{}", rendered.join("/"))
    }
}

/// A segment together with its location inside the message
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInstance {
    pub segment: Arc<Segment>,
    pub path: StructurePath,
}

impl SegmentInstance {
    pub fn name(&self) -> &str {
        &self.segment.name
    }

    /// Path of the group that directly contains the segment
    pub fn group_path(&self) -> StructurePath {
        self.path.parent()
    }
}

/// A parsed HL7v2 message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: String,
    structure_name: String,
    delimiters: Delimiters,
    root: Group,
}

impl Message {
    pub fn new(
        message_type: impl Into<String>,
        structure_name: impl Into<String>,
        delimiters: Delimiters,
        root: Group,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            structure_name: structure_name.into(),
            delimiters,
            root,
        }
    }

    /// Message code and trigger event joined with `_`, e.g. `ADT_A01`
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Name of the structure definition the groups were assembled from
    pub fn structure_name(&self) -> &str {
        &self.structure_name
    }

    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    /// Resolves a path whose every step names a group
    pub fn group_at(&self, path: &StructurePath) -> Result<&Group> {
        let mut current = &self.root;
        for step in path.steps() {
            match current.child(&step.name, step.repetition) {
                Some(Structure::Group(group)) => current = group,
                Some(Structure::Segment(_)) => {
                    return Err(Hl7Error::NavigationError(format!(
                        "{} is a segment, not a group, at {}",
                        step.name, path
                    )))
                }
                None => {
                    return Err(Hl7Error::NavigationError(format!(
                        "No repetition {} of {} at {}",
                        step.repetition, step.name, path
                    )))
                }
            }
        }
        Ok(current)
    }

    /// All repetitions of a segment directly inside the group at `group_path`
    pub fn segments_in(&self, group_path: &StructurePath, name: &str) -> Result<Vec<SegmentInstance>> {
        let group = self.group_at(group_path)?;
        Ok(group
            .segments(name)
            .into_iter()
            .enumerate()
            .map(|(rep, segment)| SegmentInstance {
                segment: Arc::clone(segment),
                path: group_path.child(name, rep),
            })
            .collect())
    }

    /// Every segment with the given name anywhere in the message, in document order
    pub fn find_segments(&self, name: &str) -> Vec<SegmentInstance> {
        let mut found = Vec::new();
        collect_segments(&self.root, &StructurePath::root(), name, &mut found);
        found
    }
}

fn collect_segments(
    group: &Group,
    path: &StructurePath,
    name: &str,
    found: &mut Vec<SegmentInstance>,
) {
    let mut seen: Vec<(&str, usize)> = Vec::new();
    for child in &group.children {
        let child_name = child.name();
        let repetition = match seen.iter_mut().find(|(n, _)| *n == child_name) {
            Some((_, count)) => {
                *count += 1;
                *count - 1
            }
            None => {
                seen.push((child_name, 1));
                0
            }
        };
        match child {
            Structure::Segment(segment) if segment.name == name => found.push(SegmentInstance {
                segment: Arc::clone(segment),
                path: path.child(child_name, repetition),
            }),
            Structure::Segment(_) => {}
            Structure::Group(inner) => {
                collect_segments(inner, &path.child(child_name, repetition), name, found)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_answers_first_part() {
        let element = Element::Primitive("123".to_string());
        assert_eq!(element.part(1).map(|e| e.text()), Some("123"));
        assert!(element.part(2).is_none());
        assert!(element.part(0).is_none());
    }

    #[test]
    fn test_path_display() {
        let path = StructurePath::root()
            .child("PATIENT_RESULT", 0)
            .child("ORDER_OBSERVATION", 2);
        assert_eq!(path.to_string(), "/PATIENT_RESULT[0]/ORDER_OBSERVATION[2]");
        assert_eq!(path.parent().len(), 1);
    }
}

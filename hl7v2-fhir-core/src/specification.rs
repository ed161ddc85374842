// Specification Resolver
//
// This module parses compact path notations such as `PID.5.1`, `OBX-5`, `CX.1` or
// `$patientId` into specifications, and extracts the values an HL7 specification
// points at from a parsed message.

use crate::context::ContextValues;
use crate::value::Value;
use hl7v2_model::{Element, Message, SegmentInstance};
use log::debug;
use std::fmt;

/// Segment names recognised as the first token of an HL7 specification.
/// Names starting with `Z` are always segments.
pub const SUPPORTED_SEGMENTS: &[&str] = &[
    "ACC", "AL1", "BLG", "CON", "CTD", "CTI", "DB1", "DG1", "DRG", "DSC", "ERR", "EVN", "FT1",
    "GT1", "IAM", "IN1", "IN2", "IN3", "MFE", "MFI", "MRG", "MSA", "MSH", "NK1", "NTE", "OBR",
    "OBX", "ORC", "PD1", "PDA", "PID", "PR1", "PRT", "PV1", "PV2", "QAK", "QPD", "QRD", "RXA",
    "RXC", "RXE", "RXO", "RXR", "ROL", "SAC", "SFT", "SPM", "TQ1", "TQ2", "TXA", "UB1", "UB2",
];

/// Sentinel for an absent index
pub const ABSENT: i32 = -1;

/// A parsed specification
#[derive(Debug, Clone, PartialEq)]
pub enum Specification {
    /// Points into the HL7 message structure
    Hl7(Hl7Specification),

    /// Points at a context variable
    Simple(SimpleSpecification),
}

/// Reference to a segment, field, component and subcomponent
#[derive(Debug, Clone, PartialEq)]
pub struct Hl7Specification {
    pub segment: Option<String>,
    pub data_type: Option<String>,
    pub field: i32,
    pub component: i32,
    pub subcomponent: i32,
    pub extract_multiple: bool,
}

/// Reference to a context variable
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleSpecification {
    pub variable: String,
    pub extract_multiple: bool,
    pub use_group: bool,
    pub fuzzy: bool,
    pub subfield: Option<String>,
}

impl Specification {
    /// Parses a raw specification using the built-in segment set
    pub fn parse(raw: &str, extract_multiple: bool, use_group: bool) -> Self {
        Self::parse_with_segments(raw, extract_multiple, use_group, &[])
    }

    /// Parses a raw specification, also recognising `extra_segments` as segment names
    pub fn parse_with_segments(
        raw: &str,
        extract_multiple: bool,
        use_group: bool,
        extra_segments: &[String],
    ) -> Self {
        let raw = raw.trim();

        if let Some(variable) = raw.strip_prefix('$') {
            return Specification::Simple(SimpleSpecification::parse(
                variable,
                extract_multiple,
                use_group,
            ));
        }

        let tokens: Vec<&str> = raw
            .split(['.', '-'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();

        let first = tokens.first().copied().unwrap_or("");
        let indices: Vec<i32> = tokens.iter().skip(1).map(|t| parse_index(t)).collect();
        let index = |i: usize| indices.get(i).copied().unwrap_or(ABSENT);

        if is_segment(first, extra_segments) {
            Specification::Hl7(Hl7Specification {
                segment: Some(first.to_string()),
                data_type: None,
                field: index(0),
                component: index(1),
                subcomponent: index(2),
                extract_multiple,
            })
        } else {
            Specification::Hl7(Hl7Specification {
                segment: None,
                data_type: if first.is_empty() {
                    None
                } else {
                    Some(first.to_string())
                },
                field: ABSENT,
                component: index(0),
                subcomponent: index(1),
                extract_multiple,
            })
        }
    }

    pub fn extract_multiple(&self) -> bool {
        match self {
            Specification::Hl7(spec) => spec.extract_multiple,
            Specification::Simple(spec) => spec.extract_multiple,
        }
    }
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specification::Hl7(spec) => write!(f, "{}", spec),
            Specification::Simple(spec) => write!(f, "{}", spec),
        }
    }
}

fn parse_index(token: &str) -> i32 {
    token.parse::<i32>().ok().filter(|i| *i > 0).unwrap_or(ABSENT)
}

fn index(value: i32) -> Option<usize> {
    usize::try_from(value).ok().filter(|i| *i > 0)
}

/// True when the token names a known segment
pub fn is_segment(token: &str, extra_segments: &[String]) -> bool {
    if token.is_empty() {
        return false;
    }
    token.starts_with('Z')
        || SUPPORTED_SEGMENTS.contains(&token)
        || extra_segments.iter().any(|s| s == token)
}

impl SimpleSpecification {
    fn parse(raw: &str, extract_multiple: bool, use_group: bool) -> Self {
        let (name, subfield) = match raw.split_once(':') {
            Some((name, subfield)) => (name, Some(subfield.trim().to_string())),
            None => (raw, None),
        };
        let name = name.trim();
        let (name, fuzzy) = match name.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (name, false),
        };

        Self {
            variable: name.to_string(),
            extract_multiple,
            use_group,
            fuzzy,
            subfield: subfield.filter(|s| !s.is_empty()),
        }
    }
}

impl fmt::Display for SimpleSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.variable)?;
        if self.fuzzy {
            write!(f, "?")?;
        }
        if let Some(subfield) = &self.subfield {
            write!(f, ":{}", subfield)?;
        }
        Ok(())
    }
}

impl Hl7Specification {
    /// Extracts the values this specification points at.
    ///
    /// Segment candidates come from the context variable named after the segment,
    /// then from the base value, then from a scan of the whole message. A segment
    /// name bound to an empty result has no candidates. Data-type
    /// specifications apply to the base value. Without `extract_multiple` at most one
    /// value is returned: the first non-empty one.
    pub fn extract(&self, message: &Message, context: &ContextValues) -> Vec<Value> {
        let values = match &self.segment {
            Some(segment) => {
                let segments = self.candidate_segments(segment, message, context);
                if segments.is_empty() {
                    debug!("No {} segment available for {}", segment, self);
                }
                self.extract_from_segments(&segments)
            }
            None => match context.base() {
                Some(base) => self.extract_from_base(base),
                None => {
                    debug!("No base value to apply {} to", self);
                    Vec::new()
                }
            },
        };

        if self.extract_multiple {
            values
        } else {
            values.into_iter().take(1).collect()
        }
    }

    fn candidate_segments(
        &self,
        segment: &str,
        message: &Message,
        context: &ContextValues,
    ) -> Vec<SegmentInstance> {
        let matching = |value: &Value| -> Vec<SegmentInstance> {
            value
                .items()
                .filter_map(Value::as_segment)
                .filter(|s| s.name() == segment)
                .cloned()
                .collect()
        };

        if let Some(bound) = context.get(segment) {
            let found = bound.value().map(matching).unwrap_or_default();
            // bound but empty: the peer is absent from the current group
            if !found.is_empty() || bound.is_empty() {
                return found;
            }
        }

        if let Some(base) = context.base() {
            let found = matching(base);
            if !found.is_empty() {
                return found;
            }
        }

        message.find_segments(segment)
    }

    fn extract_from_segments(&self, segments: &[SegmentInstance]) -> Vec<Value> {
        let mut values = Vec::new();

        for instance in segments {
            let field = match index(self.field) {
                Some(field) => field,
                None => {
                    values.push(Value::Segment(instance.clone()));
                    continue;
                }
            };

            let Some(field_value) = instance.segment.field(field) else {
                debug!("{} has no field {}", instance.name(), field);
                continue;
            };

            for repetition in &field_value.repetitions {
                if let Some(element) = self.select(repetition, self.component, self.subcomponent) {
                    values.push(Value::Element(element.clone()));
                }
            }
        }

        if self.extract_multiple {
            values
        } else {
            values.into_iter().find(|v| !v.is_empty()).into_iter().collect()
        }
    }

    fn extract_from_base(&self, base: &Value) -> Vec<Value> {
        let values: Vec<Value> = base
            .items()
            .filter_map(|item| match item {
                Value::Element(element) => self
                    .select(element, self.component, self.subcomponent)
                    .map(|e| Value::Element(e.clone())),
                _ => None,
            })
            .collect();

        if self.extract_multiple {
            values
        } else {
            values.into_iter().find(|v| !v.is_empty()).into_iter().collect()
        }
    }

    fn select<'e>(
        &self,
        element: &'e Element,
        component: i32,
        subcomponent: i32,
    ) -> Option<&'e Element> {
        let component_element = match index(component) {
            Some(c) => element.part(c)?,
            None => return Some(element).filter(|e| !e.is_empty()),
        };
        let selected = match index(subcomponent) {
            Some(s) => component_element.part(s)?,
            None => component_element,
        };
        Some(selected).filter(|e| !e.is_empty())
    }
}

impl fmt::Display for Hl7Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self
            .segment
            .as_deref()
            .or(self.data_type.as_deref())
            .unwrap_or("");
        write!(f, "{}", head)?;
        for i in [self.field, self.component, self.subcomponent] {
            if i != ABSENT {
                write!(f, ".{}", i)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_path() {
        match Specification::parse("PID.5.1.2", false, false) {
            Specification::Hl7(spec) => {
                assert_eq!(spec.segment.as_deref(), Some("PID"));
                assert_eq!((spec.field, spec.component, spec.subcomponent), (5, 1, 2));
            }
            other => panic!("Expected HL7 specification, got {:?}", other),
        }
    }

    #[test]
    fn test_display_round_trip() {
        let spec = Specification::parse("OBX-5", true, false);
        assert_eq!(spec.to_string(), "OBX.5");
        let spec = Specification::parse("$ref?:id", false, true);
        assert_eq!(spec.to_string(), "$ref?:id");
    }
}

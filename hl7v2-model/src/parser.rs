// HL7v2 Wire Parser
//
// This module splits pipe-delimited HL7v2 text into segments, fields, repetitions,
// components and subcomponents, then hands the flat segment list to the structure
// assembler.

use crate::errors::{Hl7Error, Result};
use crate::message::{Element, Field, Message, Segment};
use crate::structure;
use serde::{Deserialize, Serialize};

/// Separator characters declared in MSH-1 and MSH-2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    /// Reads the delimiters from an MSH segment line
    pub fn from_msh(line: &str) -> Result<Self> {
        let chars: Vec<char> = line.chars().collect();
        if chars.len() < 8 || !line.starts_with("MSH") {
            return Err(Hl7Error::InvalidStructure(
                "MSH segment too short to declare delimiters".to_string(),
            ));
        }
        Ok(Self {
            field: chars[3],
            component: chars[4],
            repetition: chars[5],
            escape: chars[6],
            subcomponent: chars[7],
        })
    }

    /// The MSH-2 encoding characters string
    pub fn encoding_characters(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }
}

/// Parses an HL7v2 message
///
/// Segments may be separated by `\r`, `\n` or `\r\n`. The first segment must be MSH.
pub fn parse_message(input: &str) -> Result<Message> {
    let lines: Vec<&str> = input
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let first = lines
        .first()
        .ok_or_else(|| Hl7Error::InvalidStructure("Empty message".to_string()))?;
    if !first.starts_with("MSH") {
        return Err(Hl7Error::InvalidStructure(
            "First segment must be MSH".to_string(),
        ));
    }

    let delimiters = Delimiters::from_msh(first)?;
    let segments = lines
        .iter()
        .map(|line| parse_segment(line, &delimiters))
        .collect::<Result<Vec<_>>>()?;

    let msh = &segments[0];
    let message_type_field = msh
        .field(9)
        .and_then(Field::first)
        .ok_or_else(|| Hl7Error::MissingField("Message type (MSH.9)".to_string()))?;
    let code = message_type_field.part(1).map(Element::text).unwrap_or("");
    let trigger = message_type_field.part(2).map(Element::text).unwrap_or("");
    if code.is_empty() {
        return Err(Hl7Error::MissingField("Message code (MSH.9.1)".to_string()));
    }
    let message_type = if trigger.is_empty() {
        code.to_string()
    } else {
        format!("{}_{}", code, trigger)
    };

    let declared = message_type_field
        .part(3)
        .map(Element::text)
        .filter(|s| !s.is_empty());
    let structure_name = declared
        .map(str::to_string)
        .or_else(|| structure::structure_for(&message_type).map(str::to_string))
        .unwrap_or_else(|| message_type.clone());

    let root = structure::assemble(&structure_name, segments);
    Ok(Message::new(message_type, structure_name, delimiters, root))
}

/// Parses a single segment line
pub fn parse_segment(line: &str, delimiters: &Delimiters) -> Result<Segment> {
    let parts: Vec<&str> = line.split(delimiters.field).collect();
    let name = parts[0].trim();
    if name.len() != 3
        || !name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(Hl7Error::ParseError(format!(
            "Invalid segment name: '{}'",
            name
        )));
    }

    let mut fields = Vec::new();
    if name == "MSH" {
        // MSH-1 is the field separator itself and MSH-2 must not be split
        fields.push(Field::primitive(delimiters.field.to_string()));
        fields.push(Field::primitive(parts.get(1).copied().unwrap_or("")));
        for part in parts.iter().skip(2) {
            fields.push(parse_field(part, delimiters));
        }
    } else {
        for part in parts.iter().skip(1) {
            fields.push(parse_field(part, delimiters));
        }
    }

    Ok(Segment::new(name, fields))
}

/// Parses one field into its repetitions
pub fn parse_field(value: &str, delimiters: &Delimiters) -> Field {
    Field::new(
        value
            .split(delimiters.repetition)
            .map(|rep| parse_repetition(rep, delimiters))
            .collect(),
    )
}

fn parse_repetition(value: &str, delimiters: &Delimiters) -> Element {
    let mut components: Vec<Element> = value
        .split(delimiters.component)
        .map(|component| parse_component(component, delimiters))
        .collect();

    if components.len() == 1 && matches!(components[0], Element::Primitive(_)) {
        components.remove(0)
    } else {
        Element::Composite(components)
    }
}

fn parse_component(value: &str, delimiters: &Delimiters) -> Element {
    let mut subcomponents: Vec<Element> = value
        .split(delimiters.subcomponent)
        .map(|sub| Element::Primitive(unescape(sub, delimiters)))
        .collect();

    if subcomponents.len() == 1 {
        subcomponents.remove(0)
    } else {
        Element::Composite(subcomponents)
    }
}

/// Replaces the standard escape sequences with the characters they stand for
pub fn unescape(value: &str, delimiters: &Delimiters) -> String {
    let escape = delimiters.escape;
    if !value.contains(escape) {
        return value.to_string();
    }

    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != escape {
            result.push(c);
            continue;
        }

        let mut sequence = String::new();
        let mut terminated = false;
        for next in chars.by_ref() {
            if next == escape {
                terminated = true;
                break;
            }
            sequence.push(next);
        }

        if !terminated {
            result.push(escape);
            result.push_str(&sequence);
            break;
        }

        match sequence.as_str() {
            "F" => result.push(delimiters.field),
            "S" => result.push(delimiters.component),
            "T" => result.push(delimiters.subcomponent),
            "R" => result.push(delimiters.repetition),
            "E" => result.push(escape),
            ".br" => result.push('\n'),
            _ => {
                // Unknown sequences (highlighting, hex) are kept verbatim
                result.push(escape);
                result.push_str(&sequence);
                result.push(escape);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_standard_sequences() {
        let delimiters = Delimiters::default();
        assert_eq!(unescape("a\\F\\b\\S\\c", &delimiters), "a|b^c");
        assert_eq!(unescape("x\\E\\y", &delimiters), "x\\y");
        assert_eq!(unescape("plain", &delimiters), "plain");
    }

    #[test]
    fn test_single_component_with_subcomponents_stays_nested() {
        let delimiters = Delimiters::default();
        let field = parse_field("a&b", &delimiters);
        let rep = field.first().unwrap();
        assert_eq!(rep.len(), 1);
        assert_eq!(rep.part(1).unwrap().part(2).unwrap().text(), "b");
    }
}

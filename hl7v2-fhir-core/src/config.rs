// Converter Configuration
//
// This module defines the options shared by every conversion.

use crate::errors::Result;
use crate::script::functions::DEFAULT_CUSTOM_NAMESPACE;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Options for a converter instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConverterOptions {
    /// Offset applied to HL7 date-times that carry none, e.g. `+02:00`
    pub zone_offset: Option<String>,

    /// FHIR Bundle type of the conversion output
    pub bundle_type: String,

    /// Additional segment names recognised in specifications
    pub extra_segments: Vec<String>,

    /// Name the general helper namespace is registered under
    pub custom_namespace: String,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            zone_offset: None,
            bundle_type: "collection".to_string(),
            extra_segments: Vec::new(),
            custom_namespace: DEFAULT_CUSTOM_NAMESPACE.to_string(),
        }
    }
}

impl ConverterOptions {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(json)?)
    }

    /// Parsed default offset; UTC when unset or unparseable
    pub fn offset(&self) -> FixedOffset {
        self.zone_offset
            .as_deref()
            .and_then(parse_offset)
            .unwrap_or_else(utc)
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parses `Z`, `UTC`, `+hh:mm`, `+hhmm` or `+hh`
pub fn parse_offset(text: &str) -> Option<FixedOffset> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, digits) = match text.chars().next()? {
        '+' => (1, &text[1..]),
        '-' => (-1, &text[1..]),
        _ => return None,
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConverterOptions::default();
        assert_eq!(options.bundle_type, "collection");
        assert_eq!(options.custom_namespace, "GeneralUtils");
        assert_eq!(options.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_from_yaml_partial() {
        let options =
            ConverterOptions::from_yaml_str("zoneOffset: \"-05:00\"\nextraSegments: [XYZ]\n")
                .unwrap();
        assert_eq!(options.offset().local_minus_utc(), -5 * 3600);
        assert_eq!(options.extra_segments, vec!["XYZ".to_string()]);
        assert_eq!(options.bundle_type, "collection");
    }

    #[test]
    fn test_parse_offset_forms() {
        assert_eq!(parse_offset("+0530").map(|o| o.local_minus_utc()), Some(19800));
        assert_eq!(parse_offset("-04").map(|o| o.local_minus_utc()), Some(-14400));
        assert!(parse_offset("05:00").is_none());
    }
}

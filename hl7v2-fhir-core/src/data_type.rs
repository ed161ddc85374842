// Data Type Coercion
//
// This module converts extracted HL7 values into FHIR primitive and complex
// datatypes. Input that does not coerce yields no value rather than an error.

use crate::data_source::DataSource;
use crate::errors::ConversionError;
use crate::terminology::{Coding, LookupOutcome, TerminologyService};
use crate::value::Value;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use hl7v2_model::Element;
use log::debug;
use std::fmt;
use std::str::FromStr;

/// Target type of a coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    StringAll,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Instant,
    Time,
    Uri,
    SystemUrl,
    AdministrativeGender,
    Coding,
    CodeableConcept,
    Object,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "STRING",
            DataType::StringAll => "STRING_ALL",
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Boolean => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::DateTime => "DATE_TIME",
            DataType::Instant => "INSTANT",
            DataType::Time => "TIME",
            DataType::Uri => "URI",
            DataType::SystemUrl => "SYSTEM_URL",
            DataType::AdministrativeGender => "ADMINISTRATIVE_GENDER",
            DataType::Coding => "CODING",
            DataType::CodeableConcept => "CODEABLE_CONCEPT",
            DataType::Object => "OBJECT",
        }
    }

    /// Coerces a value; `None` when the input does not fit the type
    pub fn coerce(&self, value: &Value, data_source: &dyn DataSource) -> Option<Value> {
        let coerced = match self {
            DataType::Object => Some(value.clone()),
            DataType::String => text(value).map(Value::String),
            DataType::StringAll => string_all(value).map(Value::String),
            DataType::Integer => match value {
                Value::Integer(i) => Some(Value::Integer(*i)),
                other => text(other)?.parse::<i64>().ok().map(Value::Integer),
            },
            DataType::Float => match value {
                Value::Integer(i) => Some(Value::Decimal(*i as f64)),
                Value::Decimal(d) => Some(Value::Decimal(*d)),
                other => text(other)?.parse::<f64>().ok().map(Value::Decimal),
            },
            DataType::Boolean => match value {
                Value::Boolean(b) => Some(Value::Boolean(*b)),
                other => parse_boolean(&text(other)?).map(Value::Boolean),
            },
            DataType::Date => date(&text(value)?).map(Value::String),
            DataType::DateTime => {
                date_time(&text(value)?, data_source.options().offset()).map(Value::String)
            }
            DataType::Instant => {
                instant(&text(value)?, data_source.options().offset()).map(Value::String)
            }
            DataType::Time => time(&text(value)?).map(Value::String),
            DataType::Uri => text(value)
                .filter(|s| !s.contains(char::is_whitespace))
                .map(Value::String),
            DataType::SystemUrl => {
                system_url(&text(value)?, data_source.terminology()).map(Value::String)
            }
            DataType::AdministrativeGender => {
                let code = text(value)?;
                data_source
                    .terminology()
                    .map_value("ADMINISTRATIVE_GENDER", &code)
                    .map(Value::from)
            }
            DataType::Coding => {
                coding(value, data_source.terminology()).map(|c| Value::Json(c.to_json()))
            }
            DataType::CodeableConcept => codeable_concept(value, data_source.terminology()),
        };

        if coerced.is_none() {
            debug!("Value {:?} does not coerce to {}", value, self);
        }
        coerced.filter(|v| !v.is_empty())
    }

    /// Coerces a value, or each item of a list value
    pub fn coerce_value(&self, value: &Value, data_source: &dyn DataSource) -> Option<Value> {
        match value {
            Value::List(items) if *self != DataType::Object && *self != DataType::StringAll => {
                let items: Vec<Value> = items
                    .iter()
                    .filter_map(|item| self.coerce(item, data_source))
                    .collect();
                Some(Value::List(items)).filter(|v| !v.is_empty())
            }
            single => self.coerce(single, data_source),
        }
    }
}

impl FromStr for DataType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRING" => Ok(DataType::String),
            "STRING_ALL" => Ok(DataType::StringAll),
            "INTEGER" => Ok(DataType::Integer),
            "FLOAT" => Ok(DataType::Float),
            "BOOLEAN" => Ok(DataType::Boolean),
            "DATE" => Ok(DataType::Date),
            "DATE_TIME" => Ok(DataType::DateTime),
            "INSTANT" => Ok(DataType::Instant),
            "TIME" => Ok(DataType::Time),
            "URI" => Ok(DataType::Uri),
            "SYSTEM_URL" => Ok(DataType::SystemUrl),
            "ADMINISTRATIVE_GENDER" => Ok(DataType::AdministrativeGender),
            "CODING" => Ok(DataType::Coding),
            "CODEABLE_CONCEPT" => Ok(DataType::CodeableConcept),
            "OBJECT" => Ok(DataType::Object),
            other => Err(ConversionError::InvalidTemplate(format!(
                "Unknown data type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn text(value: &Value) -> Option<String> {
    value
        .as_text()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn string_all(value: &Value) -> Option<String> {
    let parts: Vec<String> = match value {
        Value::Element(element) => element
            .primitives()
            .into_iter()
            .map(|p| p.trim().to_string())
            .collect(),
        Value::List(items) => items.iter().filter_map(string_all).collect(),
        other => text(other).into_iter().collect(),
    };
    let joined = parts
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Some(joined).filter(|s| !s.is_empty())
}

fn parse_boolean(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Components of an HL7 DTM value
#[derive(Debug, Default, PartialEq)]
struct Dtm {
    year: i32,
    month: Option<u32>,
    day: Option<u32>,
    hour: Option<u32>,
    minute: Option<u32>,
    second: Option<u32>,
    fraction: Option<String>,
    offset: Option<FixedOffset>,
}

impl Dtm {
    /// Parses `YYYY[MM[DD[HH[MM[SS[.S+]]]]]][+/-ZZZZ]`
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (body, offset) = match text.rfind(['+', '-']) {
            Some(i) if i >= 4 => (&text[..i], Some(crate::config::parse_offset(&text[i..])?)),
            _ => (text, None),
        };
        let (digits, fraction) = match body.split_once('.') {
            Some((digits, fraction)) => (digits, Some(fraction.to_string())),
            None => (body, None),
        };
        let all_digits = digits.chars().all(|c| c.is_ascii_digit());
        if digits.len() < 4 || digits.len() > 14 || digits.len() % 2 != 0 || !all_digits {
            return None;
        }
        if let Some(fraction) = &fraction {
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
        }

        let part = |start: usize| -> Option<u32> { digits.get(start..start + 2)?.parse().ok() };

        let dtm = Dtm {
            year: digits[..4].parse().ok()?,
            month: part(4),
            day: part(6),
            hour: part(8),
            minute: part(10),
            second: part(12),
            fraction,
            offset,
        };
        dtm.validate()
    }

    fn validate(self) -> Option<Self> {
        NaiveDate::from_ymd_opt(self.year, self.month.unwrap_or(1), self.day.unwrap_or(1))?;
        NaiveTime::from_hms_opt(
            self.hour.unwrap_or(0),
            self.minute.unwrap_or(0),
            self.second.unwrap_or(0),
        )?;
        Some(self)
    }

    fn date_string(&self) -> String {
        match (self.month, self.day) {
            (Some(month), Some(day)) => format!("{:04}-{:02}-{:02}", self.year, month, day),
            (Some(month), None) => format!("{:04}-{:02}", self.year, month),
            _ => format!("{:04}", self.year),
        }
    }

    fn naive(&self) -> Option<NaiveDateTime> {
        let date =
            NaiveDate::from_ymd_opt(self.year, self.month.unwrap_or(1), self.day.unwrap_or(1))?;
        let nanos = self
            .fraction
            .as_deref()
            .map(|f| {
                let padded: String = f.chars().chain(std::iter::repeat('0')).take(9).collect();
                padded.parse::<u32>().unwrap_or(0)
            })
            .unwrap_or(0);
        let time = NaiveTime::from_hms_nano_opt(
            self.hour.unwrap_or(0),
            self.minute.unwrap_or(0),
            self.second.unwrap_or(0),
            nanos,
        )?;
        Some(NaiveDateTime::new(date, time))
    }

    fn render(&self, default_offset: FixedOffset) -> Option<String> {
        let offset = self.offset.unwrap_or(default_offset);
        let local = offset.from_local_datetime(&self.naive()?).single()?;
        let format = if self.fraction.is_some() {
            SecondsFormat::Millis
        } else {
            SecondsFormat::Secs
        };
        Some(local.to_rfc3339_opts(format, false))
    }
}

/// FHIR date with the precision of the input
pub fn date(text: &str) -> Option<String> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    Dtm::parse(text).map(|dtm| dtm.date_string())
}

/// FHIR dateTime: a date when the input has no time, otherwise a full timestamp
pub fn date_time(text: &str, default_offset: FixedOffset) -> Option<String> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.format("%Y-%m-%d").to_string());
    }
    let dtm = Dtm::parse(text)?;
    if dtm.hour.is_none() {
        Some(dtm.date_string())
    } else {
        dtm.render(default_offset)
    }
}

/// FHIR instant: always a full timestamp, midnight when the input has no time
pub fn instant(text: &str, default_offset: FixedOffset) -> Option<String> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(parsed.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }
    let dtm = Dtm::parse(text)?;
    if dtm.month.is_none() || dtm.day.is_none() {
        return None;
    }
    dtm.render(default_offset)
}

/// FHIR time from an HL7 TM value `HH[MM[SS[.S+]]]`
pub fn time(text: &str) -> Option<String> {
    let digits = text.split(['.', '+', '-']).next()?.trim();
    if digits.len() < 2 || digits.len() > 6 || digits.len() % 2 != 0 {
        return None;
    }
    let part = |start: usize| -> Option<u32> {
        match digits.get(start..start + 2) {
            Some(p) => p.parse().ok(),
            None => Some(0),
        }
    };
    NaiveTime::from_hms_opt(part(0)?, part(2)?, part(4)?).map(|t| t.format("%H:%M:%S").to_string())
}

fn system_url(key: &str, terminology: &TerminologyService) -> Option<String> {
    if key.contains("://") || key.starts_with("urn:") {
        return Some(key.to_string());
    }
    terminology.system_url(key).map(str::to_string)
}

fn component(element: &Element, index: usize) -> Option<String> {
    element
        .part(index)
        .map(|p| p.text().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Builds a coding from code, display and coding-system key
fn build_coding(
    code: String,
    display: Option<String>,
    system_key: Option<String>,
    terminology: &TerminologyService,
) -> Coding {
    let Some(key) = system_key else {
        return Coding {
            system: None,
            code,
            display,
        };
    };

    match terminology.lookup(&key, &code) {
        LookupOutcome::Found(found) => Coding {
            system: found.system,
            code,
            display: display.or(found.display),
        },
        LookupOutcome::UnknownCode { system } => Coding {
            system: Some(system),
            code,
            display,
        },
        LookupOutcome::UnknownSystem => Coding {
            system: system_url(&key, terminology),
            code,
            display,
        },
    }
}

fn coding(value: &Value, terminology: &TerminologyService) -> Option<Coding> {
    match value {
        Value::Element(element) => {
            let code = component(element, 1)?;
            Some(build_coding(
                code,
                component(element, 2),
                component(element, 3),
                terminology,
            ))
        }
        Value::Json(json) => serde_json::from_value::<Coding>(json.clone()).ok(),
        other => text(other).map(|code| Coding {
            system: None,
            code,
            display: None,
        }),
    }
}

/// CodeableConcept from a CWE/CE element: primary coding in components 1-3,
/// alternate coding in 4-6, original text in 9 or the primary text
fn codeable_concept(value: &Value, terminology: &TerminologyService) -> Option<Value> {
    let element = match value {
        Value::Element(element) => element,
        Value::Json(json) if json.get("coding").is_some() => return Some(value.clone()),
        other => {
            let coding = coding(other, terminology)?;
            return Some(Value::Json(serde_json::json!({ "coding": [coding.to_json()] })));
        }
    };

    let mut codings = Vec::new();
    if let Some(code) = component(element, 1) {
        let coding = build_coding(code, component(element, 2), component(element, 3), terminology);
        codings.push(coding.to_json());
    }
    if let Some(code) = component(element, 4) {
        let coding = build_coding(code, component(element, 5), component(element, 6), terminology);
        codings.push(coding.to_json());
    }

    let text = component(element, 9).or_else(|| component(element, 2));
    if codings.is_empty() && text.is_none() {
        return None;
    }

    let mut concept = serde_json::Map::new();
    if !codings.is_empty() {
        concept.insert("coding".to_string(), serde_json::Value::Array(codings));
    }
    if let Some(text) = text {
        concept.insert("text".to_string(), serde_json::Value::String(text));
    }
    Some(Value::Json(serde_json::Value::Object(concept)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[rstest]
    #[case("2024", Some("2024"))]
    #[case("202401", Some("2024-01"))]
    #[case("20240102", Some("2024-01-02"))]
    #[case("20240102103000", Some("2024-01-02"))]
    #[case("2024-01-02", Some("2024-01-02"))]
    #[case("20241302", None)]
    #[case("2024010210301599", None)]
    #[case("abc", None)]
    fn test_date(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(date(input).as_deref(), expected);
    }

    #[rstest]
    #[case("20240102", Some("2024-01-02"))]
    #[case("202401021030", Some("2024-01-02T10:30:00+00:00"))]
    #[case("20240102103015-0500", Some("2024-01-02T10:30:15-05:00"))]
    #[case("20240102103015.25+0100", Some("2024-01-02T10:30:15.250+01:00"))]
    #[case("2024010210", Some("2024-01-02T10:00:00+00:00"))]
    #[case("20240102256000", None)]
    #[case("2024010210301500-0500", None)]
    fn test_date_time(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(date_time(input, utc()).as_deref(), expected);
    }

    #[test]
    fn test_instant_requires_day() {
        assert_eq!(instant("202401", utc()), None);
        assert_eq!(
            instant("20240102", utc()).as_deref(),
            Some("2024-01-02T00:00:00+00:00")
        );
    }

    #[rstest]
    #[case("1030", Some("10:30:00"))]
    #[case("103015.1234", Some("10:30:15"))]
    #[case("10", Some("10:00:00"))]
    #[case("2561", None)]
    fn test_time(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(time(input).as_deref(), expected);
    }

    #[test]
    fn test_boolean_forms() {
        assert_eq!(parse_boolean("Y"), Some(true));
        assert_eq!(parse_boolean("0"), Some(false));
        assert_eq!(parse_boolean("maybe"), None);
    }

    #[test]
    fn test_unknown_type_is_template_error() {
        assert!(matches!(
            "NUMBER".parse::<DataType>(),
            Err(ConversionError::InvalidTemplate(_))
        ));
    }
}

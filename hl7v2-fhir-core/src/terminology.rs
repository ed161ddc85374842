// Terminology Service
//
// This module provides coding-system lookups for coded values. The service is built
// explicitly, stays immutable while messages convert, and is replaced wholesale by
// `reload`.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A FHIR Coding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Outcome of a code lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The coding-system key is not known
    UnknownSystem,

    /// The system is known but the code is not listed
    UnknownCode { system: String },

    Found(Coding),
}

/// One coding system: its canonical URL and the codes it lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSystem {
    pub url: String,
    #[serde(default)]
    pub concepts: HashMap<String, String>,
}

/// Serialized form of the lookup tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminologySource {
    #[serde(default)]
    pub systems: HashMap<String, CodeSystem>,

    /// Value maps from HL7 table codes to FHIR codes, e.g. `ADMINISTRATIVE_GENDER`
    #[serde(default)]
    pub maps: HashMap<String, HashMap<String, String>>,
}

/// Lookup service for coding systems and value maps
#[derive(Debug, Clone, Default)]
pub struct TerminologyService {
    systems: HashMap<String, CodeSystem>,
    maps: HashMap<String, HashMap<String, String>>,
}

impl TerminologyService {
    /// Creates an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service from lookup tables
    pub fn from_source(source: TerminologySource) -> Self {
        let mut service = Self::new();
        service.reload(source);
        service
    }

    /// Creates a service from YAML lookup tables
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let source: TerminologySource = serde_yaml::from_str(yaml)?;
        Ok(Self::from_source(source))
    }

    /// Creates a service holding the common HL7 coding systems
    pub fn with_defaults() -> Self {
        Self::from_source(default_source())
    }

    /// Replaces every table with the given source
    pub fn reload(&mut self, source: TerminologySource) {
        self.systems = source
            .systems
            .into_iter()
            .map(|(key, system)| (key.to_ascii_uppercase(), system))
            .collect();
        self.maps = source
            .maps
            .into_iter()
            .map(|(key, map)| (key.to_ascii_uppercase(), map))
            .collect();
    }

    /// Canonical URL of a coding-system key
    pub fn system_url(&self, key: &str) -> Option<&str> {
        self.systems
            .get(&key.trim().to_ascii_uppercase())
            .map(|system| system.url.as_str())
    }

    /// Looks a code up in a coding system
    pub fn lookup(&self, system_key: &str, code: &str) -> LookupOutcome {
        let Some(system) = self.systems.get(&system_key.trim().to_ascii_uppercase()) else {
            return LookupOutcome::UnknownSystem;
        };

        match system.concepts.get(code.trim()) {
            Some(display) => LookupOutcome::Found(Coding {
                system: Some(system.url.clone()),
                code: code.trim().to_string(),
                display: Some(display.clone()),
            }),
            None => LookupOutcome::UnknownCode {
                system: system.url.clone(),
            },
        }
    }

    /// Maps a code through a named value map
    pub fn map_value(&self, map: &str, code: &str) -> Option<&str> {
        self.maps
            .get(&map.to_ascii_uppercase())
            .and_then(|values| {
                values
                    .get(code.trim())
                    .or_else(|| values.get(&code.trim().to_ascii_uppercase()))
            })
            .map(String::as_str)
    }
}

fn system(url: &str, concepts: &[(&str, &str)]) -> CodeSystem {
    CodeSystem {
        url: url.to_string(),
        concepts: concepts
            .iter()
            .map(|(code, display)| (code.to_string(), display.to_string()))
            .collect(),
    }
}

fn default_source() -> TerminologySource {
    let mut systems = HashMap::new();
    systems.insert("LN".to_string(), system("http://loinc.org", &[]));
    systems.insert("SCT".to_string(), system("http://snomed.info/sct", &[]));
    systems.insert("CVX".to_string(), system("http://hl7.org/fhir/sid/cvx", &[]));
    systems.insert("I10".to_string(), system("http://hl7.org/fhir/sid/icd-10-cm", &[]));
    systems.insert("ICD10CM".to_string(), system("http://hl7.org/fhir/sid/icd-10-cm", &[]));
    systems.insert("C4".to_string(), system("http://www.ama-assn.org/go/cpt", &[]));
    systems.insert("CPT".to_string(), system("http://www.ama-assn.org/go/cpt", &[]));
    systems.insert("NDC".to_string(), system("http://hl7.org/fhir/sid/ndc", &[]));
    systems.insert("RXNORM".to_string(), system("http://www.nlm.nih.gov/research/umls/rxnorm", &[]));
    systems.insert("UCUM".to_string(), system("http://unitsofmeasure.org", &[]));
    systems.insert(
        "HL70001".to_string(),
        system(
            "http://terminology.hl7.org/CodeSystem/v2-0001",
            &[("F", "Female"), ("M", "Male"), ("O", "Other"), ("U", "Unknown"), ("A", "Ambiguous"), ("N", "Not applicable")],
        ),
    );
    systems.insert(
        "HL70063".to_string(),
        system(
            "http://terminology.hl7.org/CodeSystem/v2-0063",
            &[("SPO", "Spouse"), ("CHD", "Child"), ("MTH", "Mother"), ("FTH", "Father"), ("SIB", "Sibling"), ("GRD", "Guardian")],
        ),
    );
    systems.insert(
        "HL70078".to_string(),
        system(
            "http://terminology.hl7.org/CodeSystem/v2-0078",
            &[("N", "Normal"), ("H", "High"), ("L", "Low"), ("A", "Abnormal"), ("HH", "Critical high"), ("LL", "Critical low")],
        ),
    );
    systems.insert(
        "HL70203".to_string(),
        system(
            "http://terminology.hl7.org/CodeSystem/v2-0203",
            &[("MR", "Medical record number"), ("SS", "Social Security number"), ("PI", "Patient internal identifier"), ("DL", "Driver's license number")],
        ),
    );

    let mut maps = HashMap::new();
    maps.insert(
        "ADMINISTRATIVE_GENDER".to_string(),
        [("F", "female"), ("M", "male"), ("O", "other"), ("A", "other"), ("N", "other"), ("U", "unknown")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );

    TerminologySource { systems, maps }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_lookup_outcomes() {
        let service = TerminologyService::with_defaults();
        assert_eq!(service.lookup("NOPE", "x"), LookupOutcome::UnknownSystem);
        assert_eq!(
            service.lookup("HL70001", "Z"),
            LookupOutcome::UnknownCode {
                system: "http://terminology.hl7.org/CodeSystem/v2-0001".to_string()
            }
        );
        match service.lookup("hl70001", "F") {
            LookupOutcome::Found(coding) => assert_eq!(coding.display.as_deref(), Some("Female")),
            other => panic!("Expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_reload_replaces_tables() {
        let mut service = TerminologyService::with_defaults();
        service.reload(
            serde_yaml::from_str("systems:\n  LOCAL:\n    url: urn:local\n").unwrap(),
        );
        assert_eq!(service.system_url("LN"), None);
        assert_eq!(service.system_url("local"), Some("urn:local"));
    }
}

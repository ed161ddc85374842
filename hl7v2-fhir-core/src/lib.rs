// HL7v2 to FHIR Conversion Engine
//
// This crate converts HL7v2 messages into FHIR resources by evaluating
// declarative resource templates against a parsed message.

pub mod condition;
pub mod config;
pub mod context;
pub mod data_source;
pub mod data_type;
pub mod engine;
pub mod errors;
pub mod expression;
pub mod extraction;
pub mod resource;
pub mod script;
pub mod specification;
pub mod template;
pub mod terminology;
pub mod value;
pub mod variable;

pub use condition::{Condition, Operator};
pub use config::ConverterOptions;
pub use context::ContextValues;
pub use data_source::{DataSource, Hl7DataSource};
pub use data_type::DataType;
pub use engine::{ConversionOutcome, MessageEngine};
pub use errors::{ConversionError, Result};
pub use expression::{Expression, ExpressionAttributes, ExpressionKind, TemplateRef};
pub use extraction::{extract_segment_groups, SegmentGroup, SegmentPath};
pub use resource::{ResourceEvaluationResult, ResourceTemplate};
pub use script::{FunctionRegistry, Namespace, Script, ScriptEngine};
pub use specification::{Hl7Specification, SimpleSpecification, Specification};
pub use template::{MessageTemplate, ResourceBinding, TemplateRegistry};
pub use terminology::{Coding, LookupOutcome, TerminologyService};
pub use value::{EvaluationResult, ResourceValue, Value};
pub use variable::Variable;

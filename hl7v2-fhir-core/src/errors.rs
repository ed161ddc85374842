// Conversion Error Types
//
// This module defines the error types used throughout the template engine.

use thiserror::Error;

/// Errors that can occur while loading templates and converting messages
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Template structure or attribute is not valid
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Condition string does not follow the condition grammar
    #[error("Malformed condition: {0}")]
    MalformedCondition(String),

    /// Variable definition does not follow the variable grammar
    #[error("Malformed variable: {0}")]
    MalformedVariable(String),

    /// Error during lexical analysis of a script expression
    #[error("Lexer error: {0}")]
    LexerError(String),

    /// Error during parsing of a script expression
    #[error("Parser error: {0}")]
    ParserError(String),

    /// Script expression steps outside the sandbox
    #[error("Illegal expression: {0}")]
    IllegalExpression(String),

    /// Error during script or field evaluation
    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    /// A repetition index beyond the last existing repetition was requested
    #[error("No more repetitions: {0}")]
    NoMoreRepetitions(String),

    /// A field marked as required resolved to nothing
    #[error("Required field missing: {0}")]
    RequiredFieldMissing(String),

    /// Value has the wrong shape for the requested operation
    #[error("Type error: {0}")]
    TypeError(String),

    /// No message template is registered for the message type
    #[error("Unsupported message type: {0}")]
    UnsupportedMessage(String),

    /// HL7 parsing or navigation error
    #[error("HL7 error: {0}")]
    Hl7(#[from] hl7v2_model::Hl7Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConversionError>;

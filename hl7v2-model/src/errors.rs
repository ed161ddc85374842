// HL7v2 Error Types
//
// This module defines the error types raised while parsing and navigating HL7v2 messages.

use thiserror::Error;

/// Errors that can occur during HL7v2 parsing and navigation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Hl7Error {
    /// Error while splitting the wire format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The message does not have the shape of an HL7v2 message
    #[error("Invalid message structure: {0}")]
    InvalidStructure(String),

    /// A field the parser depends on is absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A structure path does not resolve against the message tree
    #[error("Navigation error: {0}")]
    NavigationError(String),
}

pub type Result<T> = std::result::Result<T, Hl7Error>;

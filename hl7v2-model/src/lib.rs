// HL7v2 Message Model
//
// This crate parses HL7v2 pipe-delimited messages into a navigable tree of groups and
// segments. It is the message collaborator consumed by the template engine.

pub mod errors;
pub mod message;
pub mod parser;
pub mod structure;

pub use errors::{Hl7Error, Result};
pub use message::{
    Element, Field, Group, Message, PathStep, Segment, SegmentInstance, Structure, StructurePath,
};
pub use parser::{parse_message, Delimiters};

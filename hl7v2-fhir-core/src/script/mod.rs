// Script Sandbox
//
// Template scripts are single `Namespace.function(args)` calls evaluated against a
// closed function registry. There are no statements, operators or property access.

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use evaluator::{LoggingVisitor, NoopVisitor, Script, ScriptEngine, ScriptVisitor};
pub use functions::{FunctionRegistry, Namespace, ScriptFunction};
pub use parser::ScriptNode;

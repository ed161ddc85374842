// Script Evaluator
//
// This module evaluates parsed script expressions against the function registry
// and the caller's variables.

use crate::errors::{ConversionError, Result};
use crate::script::functions::FunctionRegistry;
use crate::script::lexer::tokenize;
use crate::script::parser::{Parser, ScriptNode};
use crate::value::Value;
#[cfg(feature = "trace")]
use log::{debug, trace};
use log::warn;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A parsed, reusable script expression
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    ast: ScriptNode,
}

impl Script {
    /// Tokenizes and parses an expression
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        let tokens = tokenize(source)?;
        let ast = Parser::new(&tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &ScriptNode {
        &self.ast
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Visitor trait for observing script evaluation
pub trait ScriptVisitor {
    /// Called before evaluating a node
    fn before_evaluate(&self, node: &ScriptNode);

    /// Called after evaluating a node
    fn after_evaluate(&self, node: &ScriptNode, result: &Result<Option<Value>>);
}

/// A visitor that logs evaluation steps
pub struct LoggingVisitor {
    depth: std::cell::Cell<usize>,
}

impl Default for LoggingVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingVisitor {
    /// Creates a new logging visitor
    pub fn new() -> Self {
        Self {
            depth: std::cell::Cell::new(0),
        }
    }

    #[cfg(feature = "trace")]
    fn indent(&self) -> String {
        "  ".repeat(self.depth.get())
    }
}

impl ScriptVisitor for LoggingVisitor {
    fn before_evaluate(&self, _node: &ScriptNode) {
        #[cfg(feature = "trace")]
        {
            let indent = self.indent();
            trace!("{}Evaluating: {}", indent, _node);
            self.depth.set(self.depth.get() + 1);
        }
    }

    fn after_evaluate(&self, _node: &ScriptNode, _result: &Result<Option<Value>>) {
        #[cfg(feature = "trace")]
        {
            self.depth.set(self.depth.get().saturating_sub(1));
            let indent = self.indent();
            match _result {
                Ok(value) => trace!("{}Result for {}: {:?}", indent, _node, value),
                Err(err) => debug!("{}Error evaluating {}: {}", indent, _node, err),
            }
        }
    }
}

/// A no-op visitor that does nothing
pub struct NoopVisitor;

impl Default for NoopVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopVisitor {
    /// Creates a new no-op visitor
    pub fn new() -> Self {
        Self
    }
}

impl ScriptVisitor for NoopVisitor {
    fn before_evaluate(&self, _node: &ScriptNode) {
        // Do nothing
    }

    fn after_evaluate(&self, _node: &ScriptNode, _result: &Result<Option<Value>>) {
        // Do nothing
    }
}

/// Sandboxed evaluator for `Namespace.function(args)` expressions
#[derive(Debug, Clone, Default)]
pub struct ScriptEngine {
    registry: Arc<FunctionRegistry>,
}

impl ScriptEngine {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn with_registry(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Parses an expression for later evaluation. Every call must name a
    /// registered function.
    pub fn compile(&self, expression: &str) -> Result<Script> {
        let script = Script::parse(expression)?;
        self.check(&script)?;
        Ok(script)
    }

    /// Checks a parsed script against the registry
    pub fn check(&self, script: &Script) -> Result<()> {
        self.registry.check(script.ast()).map_err(|err| match err {
            ConversionError::IllegalExpression(message) => ConversionError::IllegalExpression(
                format!("{} in expression '{}'", message, script.source()),
            ),
            other => other,
        })
    }

    /// Parses and evaluates an expression
    pub fn evaluate(
        &self,
        expression: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<Option<Value>> {
        let script = self.compile(expression)?;
        self.evaluate_script(&script, variables)
    }

    /// Evaluates an expression that must produce a boolean; an absent result is false
    pub fn evaluate_condition(
        &self,
        expression: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<bool> {
        match self.evaluate(expression, variables)? {
            None => Ok(false),
            Some(Value::Boolean(b)) => Ok(b),
            Some(other) => match other.as_text().as_deref() {
                Some("true") => Ok(true),
                Some("false") => Ok(false),
                _ => Err(ConversionError::TypeError(format!(
                    "Condition '{}' produced a {}, expected a boolean",
                    expression,
                    other.type_name()
                ))),
            },
        }
    }

    /// Evaluates a compiled script
    pub fn evaluate_script(
        &self,
        script: &Script,
        variables: &HashMap<String, Value>,
    ) -> Result<Option<Value>> {
        self.evaluate_with_visitor(script, variables, &NoopVisitor)
    }

    /// Evaluates a compiled script, reporting every node to the visitor
    pub fn evaluate_with_visitor(
        &self,
        script: &Script,
        variables: &HashMap<String, Value>,
        visitor: &dyn ScriptVisitor,
    ) -> Result<Option<Value>> {
        for name in variables.keys() {
            if self.registry.has_namespace(name) {
                warn!(
                    "Variable '{}' shadows a function namespace; calls resolve to the namespace",
                    name
                );
            }
        }

        self.evaluate_node(script.ast(), variables, visitor)
            .map_err(|err| match err {
                ConversionError::NoMoreRepetitions(message) => ConversionError::NoMoreRepetitions(
                    format!("{} in expression '{}'", message, script.source()),
                ),
                err @ ConversionError::IllegalExpression(_) => err,
                other => ConversionError::EvaluationError(format!(
                    "Failed to evaluate '{}': {}",
                    script.source(),
                    other
                )),
            })
    }

    fn evaluate_node(
        &self,
        node: &ScriptNode,
        variables: &HashMap<String, Value>,
        visitor: &dyn ScriptVisitor,
    ) -> Result<Option<Value>> {
        visitor.before_evaluate(node);

        let result = match node {
            ScriptNode::StringLiteral(s) => Ok(Some(Value::String(s.clone()))),
            ScriptNode::NumberLiteral(n) => Ok(Some(number_value(*n))),
            ScriptNode::BooleanLiteral(b) => Ok(Some(Value::Boolean(*b))),
            ScriptNode::NullLiteral => Ok(None),
            ScriptNode::Variable(name) => Ok(variables.get(name).cloned()),
            ScriptNode::Call {
                namespace,
                function,
                arguments,
            } => self.call(namespace, function, arguments, variables, visitor),
        };

        visitor.after_evaluate(node, &result);
        result
    }

    fn call(
        &self,
        namespace: &str,
        function: &str,
        arguments: &[ScriptNode],
        variables: &HashMap<String, Value>,
        visitor: &dyn ScriptVisitor,
    ) -> Result<Option<Value>> {
        let callable = self.registry.resolve(namespace, function)?;

        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.evaluate_node(argument, variables, visitor)?);
        }

        callable(&values)
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Integer(n as i64)
    } else {
        Value::Decimal(n)
    }
}

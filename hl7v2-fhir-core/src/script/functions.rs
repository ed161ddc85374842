// Script Function Registry
//
// This module holds the closed set of namespaces callable from template scripts:
// String, StringUtils, NumberUtils and UUID, plus one injectable namespace
// (GeneralUtils by default) carrying converter helpers.

use crate::errors::{ConversionError, Result};
use crate::script::parser::ScriptNode;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A callable script function. Absent arguments (null literals, unresolved
/// variables) are passed as `None`.
pub type ScriptFunction = Arc<dyn Fn(&[Option<Value>]) -> Result<Option<Value>> + Send + Sync>;

/// Namespaces built into every registry
pub const BUILTIN_NAMESPACES: &[&str] = &["String", "StringUtils", "NumberUtils", "UUID"];

/// Default name of the injectable namespace
pub const DEFAULT_CUSTOM_NAMESPACE: &str = "GeneralUtils";

/// A named set of functions
#[derive(Clone, Default)]
pub struct Namespace {
    functions: HashMap<String, ScriptFunction>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function to the namespace
    pub fn with_function<F>(mut self, name: &str, function: F) -> Self
    where
        F: Fn(&[Option<Value>]) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ScriptFunction> {
        self.functions.get(name)
    }

    /// Function names, sorted
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("functions", &self.function_names())
            .finish()
    }
}

/// Whitelist of namespaces reachable from scripts
#[derive(Clone, Debug)]
pub struct FunctionRegistry {
    namespaces: HashMap<String, Namespace>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_CUSTOM_NAMESPACE)
    }
}

impl FunctionRegistry {
    /// Creates a registry holding only the built-in namespaces
    pub fn builtin() -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert("String".to_string(), string_namespace());
        namespaces.insert("StringUtils".to_string(), string_utils_namespace());
        namespaces.insert("NumberUtils".to_string(), number_utils_namespace());
        namespaces.insert("UUID".to_string(), uuid_namespace());
        Self { namespaces }
    }

    /// Creates a registry with the built-ins and the general helpers registered
    /// under `custom_namespace`
    pub fn with_defaults(custom_namespace: &str) -> Self {
        let mut registry = Self::builtin();
        registry
            .namespaces
            .insert(custom_namespace.to_string(), general_utils_namespace());
        registry
    }

    /// Registers the injectable namespace. Built-in namespaces cannot be replaced.
    pub fn register_namespace(&mut self, name: &str, namespace: Namespace) -> Result<()> {
        if BUILTIN_NAMESPACES.contains(&name) {
            return Err(ConversionError::InvalidTemplate(format!(
                "Namespace '{}' is built in and cannot be replaced",
                name
            )));
        }
        self.namespaces
            .retain(|existing, _| BUILTIN_NAMESPACES.contains(&existing.as_str()));
        self.namespaces.insert(name.to_string(), namespace);
        Ok(())
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// Checks that every call in the tree names a registered function
    pub fn check(&self, node: &ScriptNode) -> Result<()> {
        if let ScriptNode::Call {
            namespace,
            function,
            arguments,
        } = node
        {
            self.resolve(namespace, function)?;
            for argument in arguments {
                self.check(argument)?;
            }
        }
        Ok(())
    }

    /// Looks up a function, failing with an illegal-expression error when the
    /// namespace or the function is not registered
    pub fn resolve(&self, namespace: &str, function: &str) -> Result<&ScriptFunction> {
        let functions = self.namespaces.get(namespace).ok_or_else(|| {
            ConversionError::IllegalExpression(format!("Unknown namespace '{}'", namespace))
        })?;
        functions.get(function).ok_or_else(|| {
            ConversionError::IllegalExpression(format!(
                "Unknown function '{}.{}'",
                namespace, function
            ))
        })
    }
}

// Argument helpers

fn arg(args: &[Option<Value>], index: usize) -> Option<&Value> {
    args.get(index).and_then(Option::as_ref)
}

fn text(args: &[Option<Value>], index: usize) -> Option<String> {
    arg(args, index).and_then(Value::as_text)
}

fn text_or_empty(args: &[Option<Value>], index: usize) -> String {
    text(args, index).unwrap_or_default()
}

fn number(args: &[Option<Value>], index: usize) -> Option<f64> {
    match arg(args, index)? {
        Value::Integer(i) => Some(*i as f64),
        Value::Decimal(d) => Some(*d),
        other => other.as_text()?.trim().parse::<f64>().ok(),
    }
}

fn integer(args: &[Option<Value>], index: usize) -> Option<i64> {
    number(args, index).map(|n| n as i64)
}

fn string(value: impl Into<String>) -> Result<Option<Value>> {
    Ok(Some(Value::String(value.into())))
}

fn boolean(value: bool) -> Result<Option<Value>> {
    Ok(Some(Value::Boolean(value)))
}

fn optional_string(value: Option<String>) -> Result<Option<Value>> {
    Ok(value.map(Value::String))
}

fn require_text(args: &[Option<Value>], index: usize, function: &str) -> Result<String> {
    text(args, index).ok_or_else(|| {
        ConversionError::EvaluationError(format!(
            "{} expects a text argument at position {}",
            function,
            index + 1
        ))
    })
}

fn char_slice(value: &str, start: usize, end: usize) -> String {
    value.chars().skip(start).take(end.saturating_sub(start)).collect()
}

fn string_namespace() -> Namespace {
    Namespace::new()
        .with_function("toString", |args| string(text_or_empty(args, 0)))
        .with_function("valueOf", |args| optional_string(text(args, 0)))
        .with_function("trim", |args| optional_string(text(args, 0).map(|s| s.trim().to_string())))
        .with_function("toUpperCase", |args| {
            optional_string(text(args, 0).map(|s| s.to_uppercase()))
        })
        .with_function("toLowerCase", |args| {
            optional_string(text(args, 0).map(|s| s.to_lowercase()))
        })
        .with_function("length", |args| {
            Ok(Some(Value::Integer(text_or_empty(args, 0).chars().count() as i64)))
        })
        .with_function("concat", |args| {
            let joined: String = (0..args.len()).filter_map(|i| text(args, i)).collect();
            string(joined)
        })
        .with_function("join", |args| {
            let separator = text_or_empty(args, 0);
            let parts: Vec<String> = (1..args.len())
                .flat_map(|i| match arg(args, i) {
                    Some(Value::List(items)) => items.iter().filter_map(Value::as_text).collect(),
                    Some(value) => value.as_text().into_iter().collect::<Vec<_>>(),
                    None => Vec::new(),
                })
                .collect();
            string(parts.join(&separator))
        })
        .with_function("substring", |args| {
            let value = require_text(args, 0, "String.substring")?;
            let len = value.chars().count();
            let start = integer(args, 1).unwrap_or(0).clamp(0, len as i64) as usize;
            let end = integer(args, 2)
                .map(|e| e.clamp(0, len as i64) as usize)
                .unwrap_or(len);
            string(char_slice(&value, start, end))
        })
        .with_function("replace", |args| {
            let value = require_text(args, 0, "String.replace")?;
            let from = text_or_empty(args, 1);
            if from.is_empty() {
                return string(value);
            }
            string(value.replace(&from, &text_or_empty(args, 2)))
        })
        .with_function("split", |args| {
            let value = require_text(args, 0, "String.split")?;
            let separator = text_or_empty(args, 1);
            let parts: Vec<Value> = if separator.is_empty() {
                vec![Value::String(value)]
            } else {
                value.split(separator.as_str()).map(Value::from).collect()
            };
            Ok(Some(Value::List(parts)))
        })
        .with_function("equals", |args| boolean(text(args, 0) == text(args, 1)))
        .with_function("startsWith", |args| {
            boolean(text_or_empty(args, 0).starts_with(&text_or_empty(args, 1)))
        })
        .with_function("endsWith", |args| {
            boolean(text_or_empty(args, 0).ends_with(&text_or_empty(args, 1)))
        })
        .with_function("contains", |args| {
            boolean(text_or_empty(args, 0).contains(&text_or_empty(args, 1)))
        })
}

fn string_utils_namespace() -> Namespace {
    Namespace::new()
        .with_function("isBlank", |args| {
            boolean(text(args, 0).map(|s| s.trim().is_empty()).unwrap_or(true))
        })
        .with_function("isNotBlank", |args| {
            boolean(text(args, 0).map(|s| !s.trim().is_empty()).unwrap_or(false))
        })
        .with_function("isEmpty", |args| {
            boolean(text(args, 0).map(|s| s.is_empty()).unwrap_or(true))
        })
        .with_function("isNotEmpty", |args| {
            boolean(text(args, 0).map(|s| !s.is_empty()).unwrap_or(false))
        })
        .with_function("upperCase", |args| {
            optional_string(text(args, 0).map(|s| s.to_uppercase()))
        })
        .with_function("lowerCase", |args| {
            optional_string(text(args, 0).map(|s| s.to_lowercase()))
        })
        .with_function("capitalize", |args| {
            optional_string(text(args, 0).map(|s| {
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => s,
                }
            }))
        })
        .with_function("strip", |args| optional_string(text(args, 0).map(|s| s.trim().to_string())))
        .with_function("defaultIfBlank", |args| {
            match text(args, 0).filter(|s| !s.trim().is_empty()) {
                Some(value) => string(value),
                None => optional_string(text(args, 1)),
            }
        })
        .with_function("equalsIgnoreCase", |args| {
            let left = text(args, 0).map(|s| s.to_lowercase());
            let right = text(args, 1).map(|s| s.to_lowercase());
            boolean(left == right)
        })
        .with_function("left", |args| {
            let value = require_text(args, 0, "StringUtils.left")?;
            let count = integer(args, 1).unwrap_or(0).max(0) as usize;
            string(char_slice(&value, 0, count))
        })
        .with_function("right", |args| {
            let value = require_text(args, 0, "StringUtils.right")?;
            let len = value.chars().count();
            let count = (integer(args, 1).unwrap_or(0).max(0) as usize).min(len);
            string(char_slice(&value, len - count, len))
        })
        .with_function("leftPad", |args| {
            let value = text_or_empty(args, 0);
            let size = integer(args, 1).unwrap_or(0).max(0) as usize;
            let pad = text(args, 2)
                .and_then(|p| p.chars().next())
                .unwrap_or(' ');
            let missing = size.saturating_sub(value.chars().count());
            string(std::iter::repeat(pad).take(missing).chain(value.chars()).collect::<String>())
        })
        .with_function("substringBefore", |args| {
            let value = text_or_empty(args, 0);
            let separator = text_or_empty(args, 1);
            match value.find(separator.as_str()) {
                Some(i) if !separator.is_empty() => string(&value[..i]),
                _ => string(value),
            }
        })
        .with_function("substringAfter", |args| {
            let value = text_or_empty(args, 0);
            let separator = text_or_empty(args, 1);
            match value.find(separator.as_str()) {
                Some(i) if !separator.is_empty() => string(&value[i + separator.len()..]),
                _ => string(""),
            }
        })
}

fn number_utils_namespace() -> Namespace {
    Namespace::new()
        .with_function("toInt", |args| {
            let parsed = text(args, 0).and_then(|s| s.trim().parse::<i64>().ok());
            Ok(parsed.or_else(|| integer(args, 1)).map(Value::Integer))
        })
        .with_function("toDouble", |args| {
            let parsed = text(args, 0).and_then(|s| s.trim().parse::<f64>().ok());
            Ok(parsed.or_else(|| number(args, 1)).map(Value::Decimal))
        })
        .with_function("isDigits", |args| {
            let value = text_or_empty(args, 0);
            boolean(!value.is_empty() && value.chars().all(|c| c.is_ascii_digit()))
        })
        .with_function("isCreatable", |args| {
            boolean(text(args, 0).map(|s| s.trim().parse::<f64>().is_ok()).unwrap_or(false))
        })
        .with_function("max", |args| {
            let max = (0..args.len()).filter_map(|i| number(args, i)).reduce(f64::max);
            Ok(max.map(Value::Decimal))
        })
        .with_function("min", |args| {
            let min = (0..args.len()).filter_map(|i| number(args, i)).reduce(f64::min);
            Ok(min.map(Value::Decimal))
        })
}

fn uuid_namespace() -> Namespace {
    Namespace::new().with_function("randomUUID", |_| string(uuid::Uuid::new_v4().to_string()))
}

/// Converter helpers registered under the injectable namespace
pub fn general_utils_namespace() -> Namespace {
    Namespace::new()
        .with_function("generateResourceId", |_| string(uuid::Uuid::new_v4().to_string()))
        .with_function("generateName", |args| {
            // prefix, given, family, suffix
            let parts: Vec<String> = [0, 1, 2, 3]
                .iter()
                .filter_map(|&i| text(args, i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                Ok(None)
            } else {
                string(parts.join(" "))
            }
        })
        .with_function("concatenate", |args| {
            let separator = text(args, 0).unwrap_or_else(|| " ".to_string());
            let parts: Vec<String> = (1..args.len())
                .filter_map(|i| text(args, i))
                .filter(|s| !s.trim().is_empty())
                .collect();
            if parts.is_empty() {
                Ok(None)
            } else {
                string(parts.join(&separator))
            }
        })
        .with_function("splitAndExtract", |args| {
            let value = require_text(args, 0, "GeneralUtils.splitAndExtract")?;
            let separator = text_or_empty(args, 1);
            let index = integer(args, 2).unwrap_or(0).max(0) as usize;
            if separator.is_empty() {
                return optional_string(Some(value).filter(|_| index == 0));
            }
            optional_string(
                value
                    .split(separator.as_str())
                    .nth(index)
                    .map(|s| s.trim().to_string()),
            )
        })
        .with_function("defaultIfNull", |args| {
            Ok(arg(args, 0).or_else(|| arg(args, 1)).cloned())
        })
        .with_function("getRepetition", |args| {
            // 0-based index into the repetitions of a field
            let index = integer(args, 1).unwrap_or(0);
            let repetitions: Vec<Value> = match arg(args, 0) {
                Some(value) => value.clone().into_list(),
                None => Vec::new(),
            };
            if index < 0 || index as usize >= repetitions.len() {
                return Err(ConversionError::NoMoreRepetitions(format!(
                    "repetition {} requested, {} available",
                    index,
                    repetitions.len()
                )));
            }
            Ok(repetitions.into_iter().nth(index as usize))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(
        registry: &FunctionRegistry,
        ns: &str,
        f: &str,
        args: &[Option<Value>],
    ) -> Option<Value> {
        let function = registry.resolve(ns, f).unwrap();
        function(args).unwrap()
    }

    #[test]
    fn test_builtin_namespaces_cannot_be_replaced() {
        let mut registry = FunctionRegistry::default();
        assert!(registry.register_namespace("String", Namespace::new()).is_err());
    }

    #[test]
    fn test_register_custom_namespace_replaces_previous() {
        let mut registry = FunctionRegistry::default();
        let custom = Namespace::new().with_function("answer", |_| Ok(Some(Value::Integer(42))));
        registry.register_namespace("Local", custom).unwrap();

        assert!(!registry.has_namespace("GeneralUtils"));
        assert_eq!(call(&registry, "Local", "answer", &[]), Some(Value::Integer(42)));
    }

    #[test]
    fn test_to_string_without_arguments() {
        let registry = FunctionRegistry::default();
        assert_eq!(
            call(&registry, "String", "toString", &[]),
            Some(Value::from(""))
        );
    }

    #[test]
    fn test_get_repetition_past_end() {
        let registry = FunctionRegistry::default();
        let function = registry.resolve("GeneralUtils", "getRepetition").unwrap();
        let field = Some(Value::List(vec![Value::from("a"), Value::from("b")]));
        let result = function(&[field, Some(Value::Integer(2))]);
        assert!(matches!(result, Err(ConversionError::NoMoreRepetitions(_))));
    }
}

// Condition Evaluator
//
// This module parses condition strings into predicate trees and tests them
// against a context store.
//
//   condition := and_group ( "||" and_group )*
//   and_group := atom ( "&&" atom )*
//   atom      := TOKEN TOKEN [ TOKEN ]

use crate::context::ContextValues;
use crate::errors::{ConversionError, Result};
use crate::specification::{SimpleSpecification, Specification};
use crate::value::Value;
use crate::variable::lookup_variable;
use nom::{
    bytes::complete::tag,
    character::complete::multispace0,
    combinator::all_consuming,
    error::{Error, ErrorKind},
    multi::{many1, separated_list1},
    sequence::{preceded, terminated},
    IResult,
};
use std::fmt;
use std::str::FromStr;

/// Comparison operators usable in three-token atoms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqualTo,
    LessThanOrEqualTo,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
}

impl FromStr for Operator {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EQUALS" => Ok(Operator::Equals),
            "NOT_EQUALS" => Ok(Operator::NotEquals),
            "GREATER_THAN" => Ok(Operator::GreaterThan),
            "LESS_THAN" => Ok(Operator::LessThan),
            "GREATER_THAN_OR_EQUAL_TO" => Ok(Operator::GreaterThanOrEqualTo),
            "LESS_THAN_OR_EQUAL_TO" => Ok(Operator::LessThanOrEqualTo),
            "CONTAINS" => Ok(Operator::Contains),
            "NOT_CONTAINS" => Ok(Operator::NotContains),
            "STARTS_WITH" => Ok(Operator::StartsWith),
            "ENDS_WITH" => Ok(Operator::EndsWith),
            "IN" => Ok(Operator::In),
            "NOT_IN" => Ok(Operator::NotIn),
            other => Err(ConversionError::MalformedCondition(format!(
                "Unknown operator '{}'",
                other
            ))),
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Variable(SimpleSpecification),
    Literal(String),
}

/// A parsed condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    CheckNull(SimpleSpecification),
    CheckNotNull(SimpleSpecification),
    SimpleBiCondition {
        var1: SimpleSpecification,
        operator: Operator,
        var2: Operand,
    },
    CompoundAnd(Vec<Condition>),
    CompoundOr(Vec<Condition>),
}

/// Scans one whitespace-delimited token, stopping before `&&` and `||`
fn word(input: &str) -> IResult<&str, &str> {
    let (input, _) = multispace0(input)?;
    let end = input
        .char_indices()
        .find(|(i, c)| {
            c.is_whitespace() || input[*i..].starts_with("&&") || input[*i..].starts_with("||")
        })
        .map(|(i, _)| i)
        .unwrap_or(input.len());

    if end == 0 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::TakeWhile1)));
    }
    Ok((&input[end..], &input[..end]))
}

fn atom(input: &str) -> IResult<&str, Vec<&str>> {
    many1(word)(input)
}

fn and_group(input: &str) -> IResult<&str, Vec<Vec<&str>>> {
    separated_list1(preceded(multispace0, tag("&&")), atom)(input)
}

fn condition(input: &str) -> IResult<&str, Vec<Vec<Vec<&str>>>> {
    all_consuming(terminated(
        separated_list1(preceded(multispace0, tag("||")), and_group),
        multispace0,
    ))(input)
}

fn variable(token: &str, text: &str) -> Result<SimpleSpecification> {
    if !token.starts_with('$') {
        return Err(ConversionError::MalformedCondition(format!(
            "Left operand '{}' must be a $variable in '{}'",
            token, text
        )));
    }
    match Specification::parse(token, false, false) {
        Specification::Simple(spec) => Ok(spec),
        Specification::Hl7(_) => Err(ConversionError::MalformedCondition(format!(
            "'{}' is not a variable",
            token
        ))),
    }
}

fn build_atom(tokens: &[&str], text: &str) -> Result<Condition> {
    match tokens {
        [var, op] => {
            let var = variable(var, text)?;
            match op.to_ascii_uppercase().as_str() {
                "NULL" => Ok(Condition::CheckNull(var)),
                "NOT_NULL" => Ok(Condition::CheckNotNull(var)),
                other => Err(ConversionError::MalformedCondition(format!(
                    "Expected NULL or NOT_NULL, found '{}' in '{}'",
                    other, text
                ))),
            }
        }
        [var1, op, var2] => {
            let var1 = variable(var1, text)?;
            let operator = op.parse::<Operator>()?;
            let var2 = if var2.starts_with('$') {
                Operand::Variable(variable(var2, text)?)
            } else {
                Operand::Literal(unquote(var2).to_string())
            };
            Ok(Condition::SimpleBiCondition {
                var1,
                operator,
                var2,
            })
        }
        _ => Err(ConversionError::MalformedCondition(format!(
            "Condition atoms need 2 or 3 tokens, found {} in '{}'",
            tokens.len(),
            text
        ))),
    }
}

fn unquote(token: &str) -> &str {
    for quote in ['\'', '"'] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return &token[1..token.len() - 1];
        }
    }
    token
}

impl Condition {
    /// Parses a condition string
    pub fn parse(text: &str) -> Result<Self> {
        let (_, groups) = condition(text.trim()).map_err(|_| {
            ConversionError::MalformedCondition(format!("Cannot parse condition '{}'", text))
        })?;

        let mut alternatives = Vec::with_capacity(groups.len());
        for group in groups {
            let mut atoms = Vec::with_capacity(group.len());
            for tokens in group {
                atoms.push(build_atom(&tokens, text)?);
            }
            alternatives.push(if atoms.len() == 1 {
                atoms.remove(0)
            } else {
                Condition::CompoundAnd(atoms)
            });
        }

        Ok(if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Condition::CompoundOr(alternatives)
        })
    }

    /// Tests the condition against the context. Missing operands make a
    /// comparison false.
    pub fn test(&self, context: &ContextValues) -> bool {
        match self {
            Condition::CheckNull(var) => lookup_variable(var, context).is_none(),
            Condition::CheckNotNull(var) => lookup_variable(var, context).is_some(),
            Condition::SimpleBiCondition {
                var1,
                operator,
                var2,
            } => {
                let Some(left) = lookup_variable(var1, context) else {
                    return false;
                };
                let right = match var2 {
                    Operand::Variable(spec) => match lookup_variable(spec, context) {
                        Some(value) => value,
                        None => return false,
                    },
                    Operand::Literal(literal) => Value::String(literal.clone()),
                };
                apply(*operator, &left, &right)
            }
            Condition::CompoundAnd(conditions) => conditions.iter().all(|c| c.test(context)),
            Condition::CompoundOr(conditions) => conditions.iter().any(|c| c.test(context)),
        }
    }
}

impl FromStr for Condition {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        Condition::parse(s)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Variable(spec) => write!(f, "{}", spec),
            Operand::Literal(literal) => write!(f, "{}", literal),
        }
    }
}

/// Runtime type of the left operand, selecting the predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandKind {
    String,
    Integer,
    Decimal,
    Boolean,
    List,
}

fn operand_kind(value: &Value) -> Option<OperandKind> {
    match value {
        Value::String(_) | Value::Element(_) => Some(OperandKind::String),
        Value::Integer(_) => Some(OperandKind::Integer),
        Value::Decimal(_) => Some(OperandKind::Decimal),
        Value::Boolean(_) => Some(OperandKind::Boolean),
        Value::List(_) => Some(OperandKind::List),
        Value::Json(serde_json::Value::String(_)) => Some(OperandKind::String),
        Value::Json(serde_json::Value::Bool(_)) => Some(OperandKind::Boolean),
        Value::Json(serde_json::Value::Number(n)) if n.is_i64() => Some(OperandKind::Integer),
        Value::Json(serde_json::Value::Number(_)) => Some(OperandKind::Decimal),
        _ => None,
    }
}

type Predicate = fn(&Value, &Value) -> Option<bool>;

/// Predicate table keyed by operator and left operand type
fn predicate(operator: Operator, kind: OperandKind) -> Option<Predicate> {
    use OperandKind as K;
    use Operator as O;

    let predicate: Predicate = match (operator, kind) {
        (O::Equals, K::String) => |l, r| Some(text_eq(l, r)),
        (O::NotEquals, K::String) => |l, r| Some(!text_eq(l, r)),
        (O::Equals, K::Integer | K::Decimal) => |l, r| Some(numeric(l, r)? == 0.0),
        (O::NotEquals, K::Integer | K::Decimal) => |l, r| Some(numeric(l, r)? != 0.0),
        (O::Equals, K::Boolean) => |l, r| Some(boolean(l)? == boolean(r)?),
        (O::NotEquals, K::Boolean) => |l, r| Some(boolean(l)? != boolean(r)?),
        (O::GreaterThan, K::String | K::Integer | K::Decimal) => |l, r| Some(numeric(l, r)? > 0.0),
        (O::LessThan, K::String | K::Integer | K::Decimal) => |l, r| Some(numeric(l, r)? < 0.0),
        (O::GreaterThanOrEqualTo, K::String | K::Integer | K::Decimal) => {
            |l, r| Some(numeric(l, r)? >= 0.0)
        }
        (O::LessThanOrEqualTo, K::String | K::Integer | K::Decimal) => {
            |l, r| Some(numeric(l, r)? <= 0.0)
        }
        (O::Contains, K::String) => |l, r| Some(l.as_text()?.contains(&r.as_text()?)),
        (O::NotContains, K::String) => |l, r| Some(!l.as_text()?.contains(&r.as_text()?)),
        (O::StartsWith, K::String) => |l, r| Some(l.as_text()?.starts_with(&r.as_text()?)),
        (O::EndsWith, K::String) => |l, r| Some(l.as_text()?.ends_with(&r.as_text()?)),
        (O::Contains, K::List) => |l, r| Some(l.items().any(|item| text_eq(item, r))),
        (O::NotContains, K::List) => |l, r| Some(!l.items().any(|item| text_eq(item, r))),
        (O::In, K::String | K::Integer) => |l, r| Some(in_list(l, r)?),
        (O::NotIn, K::String | K::Integer) => |l, r| Some(!in_list(l, r)?),
        _ => return None,
    };
    Some(predicate)
}

fn apply(operator: Operator, left: &Value, right: &Value) -> bool {
    operand_kind(left)
        .and_then(|kind| predicate(operator, kind))
        .and_then(|predicate| predicate(left, right))
        .unwrap_or(false)
}

fn text_eq(left: &Value, right: &Value) -> bool {
    match (left.as_text(), right.as_text()) {
        (Some(l), Some(r)) => l.trim().eq_ignore_ascii_case(r.trim()),
        _ => false,
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Decimal(d) => Some(*d),
        other => other.as_text()?.trim().parse::<f64>().ok(),
    }
}

/// Compares both operands as numbers; `None` when either does not coerce
fn numeric(left: &Value, right: &Value) -> Option<f64> {
    let l = to_number(left)?;
    let r = to_number(right)?;
    Some(if l > r {
        1.0
    } else if l < r {
        -1.0
    } else {
        0.0
    })
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(b) => Some(*b),
        other => match other.as_text()?.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
    }
}

fn in_list(left: &Value, right: &Value) -> Option<bool> {
    let needle = left.as_text()?;
    let haystack = right.as_text()?;
    Some(
        haystack
            .split(',')
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(needle.trim())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EvaluationResult;

    #[test]
    fn test_word_stops_at_operators() {
        let (rest, token) = word("$a&&$b").unwrap();
        assert_eq!(token, "$a");
        assert_eq!(rest, "&&$b");
    }

    #[test]
    fn test_predicate_table_fails_closed() {
        assert!(predicate(Operator::StartsWith, OperandKind::Boolean).is_none());
        let context = ContextValues::from_entries(vec![(
            "flag",
            EvaluationResult::simple(Value::Boolean(true)),
        )]);
        let condition = Condition::parse("$flag STARTS_WITH t").unwrap();
        assert!(!condition.test(&context));
    }
}

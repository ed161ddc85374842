// Variable Resolution
//
// This module parses template variable definitions and resolves candidate
// specifications against the context store and the message.
//
//   variable  := [ type "," ] spec_list [ "," expression ]
//   spec_list := spec ( "|" spec )* [ "*" | "+" ]
//   spec      := [^ \t,|*+]+

use crate::context::{ContextValues, GROUP_ID_KEY};
use crate::data_source::DataSource;
use crate::data_type::DataType;
use crate::errors::{ConversionError, Result};
use crate::script::Script;
use crate::specification::{SimpleSpecification, Specification};
use crate::value::{EvaluationResult, Value};
use log::debug;
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, one_of, space0},
    combinator::{all_consuming, map_res, opt, rest},
    multi::separated_list1,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};

/// Specs shared by every variable kind
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleVariable {
    pub name: String,
    pub specs: Vec<String>,
    pub extract_multiple: bool,
    pub combine_multiple: bool,
}

/// A template variable
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// Resolves its specs
    Simple(SimpleVariable),

    /// Resolves its specs and coerces the value
    DataType {
        base: SimpleVariable,
        value_type: DataType,
    },

    /// Resolves its specs, then runs a script with the value bound under the
    /// variable's name
    Expression {
        base: SimpleVariable,
        expression: Script,
    },
}

struct RawVariable<'a> {
    value_type: Option<DataType>,
    specs: Vec<&'a str>,
    marker: Option<char>,
    expression: Option<&'a str>,
}

fn type_prefix(input: &str) -> IResult<&str, DataType> {
    terminated(
        map_res(
            preceded(space0, take_while1(|c: char| c.is_ascii_uppercase() || c == '_')),
            |name: &str| name.parse::<DataType>(),
        ),
        tuple((space0, char(','))),
    )(input)
}

fn spec(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !matches!(c, ' ' | '\t' | ',' | '|' | '*' | '+'))(input)
}

fn spec_list(input: &str) -> IResult<&str, (Vec<&str>, Option<char>)> {
    tuple((
        preceded(
            space0,
            separated_list1(delimited(space0, char('|'), space0), spec),
        ),
        preceded(space0, opt(one_of("*+"))),
    ))(input)
}

fn raw_variable(input: &str) -> IResult<&str, RawVariable<'_>> {
    let (input, value_type) = opt(type_prefix)(input)?;
    let (input, (specs, marker)) = spec_list(input)?;
    let (input, expression) = all_consuming(terminated(
        opt(preceded(tuple((space0, char(','))), rest)),
        space0,
    ))(input)?;

    Ok((
        input,
        RawVariable {
            value_type,
            specs,
            marker,
            expression,
        },
    ))
}

impl Variable {
    /// Parses a variable definition
    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        let (_, parsed) = raw_variable(raw.trim()).map_err(|_| {
            ConversionError::MalformedVariable(format!("Cannot parse variable {}: '{}'", name, raw))
        })?;

        let base = SimpleVariable {
            name: name.to_string(),
            specs: parsed.specs.iter().map(|s| s.to_string()).collect(),
            extract_multiple: parsed.marker == Some('*'),
            combine_multiple: parsed.marker == Some('+'),
        };

        let expression = parsed.expression.map(str::trim).filter(|e| !e.is_empty());

        match (parsed.value_type, expression) {
            (Some(_), Some(_)) => Err(ConversionError::MalformedVariable(format!(
                "Variable {} declares both a type and an expression: '{}'",
                name, raw
            ))),
            (Some(value_type), None) => Ok(Variable::DataType { base, value_type }),
            (None, Some(expression)) => Ok(Variable::Expression {
                base,
                expression: Script::parse(expression)?,
            }),
            (None, None) => Ok(Variable::Simple(base)),
        }
    }

    pub fn base(&self) -> &SimpleVariable {
        match self {
            Variable::Simple(base) => base,
            Variable::DataType { base, .. } => base,
            Variable::Expression { base, .. } => base,
        }
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    /// Resolves the variable
    pub fn evaluate(
        &self,
        data_source: &dyn DataSource,
        context: &ContextValues,
        use_group: bool,
    ) -> Result<EvaluationResult> {
        let base = self.base();
        let specs = parse_specs(
            &base.specs,
            base.extract_multiple,
            use_group,
            &data_source.options().extra_segments,
        );
        let resolved = resolve_specs(&specs, data_source, context, base.combine_multiple)?;

        match self {
            Variable::Simple(_) => Ok(resolved),
            Variable::DataType { value_type, .. } => {
                Ok(resolved
                    .value()
                    .and_then(|value| value_type.coerce_value(value, data_source))
                    .map(EvaluationResult::simple)
                    .unwrap_or_default())
            }
            Variable::Expression { expression, .. } => {
                let mut variables = context.to_variables();
                if let Some(value) = resolved.into_value() {
                    variables.insert(base.name.clone(), value);
                }
                let value = data_source.evaluate_script(expression, &variables)?;
                Ok(value.map(EvaluationResult::simple).unwrap_or_default())
            }
        }
    }
}

/// Parses a bare spec list such as `PID.3 | PID.2 *` into its specs and marker
pub fn parse_spec_list(raw: &str) -> Result<(Vec<String>, Option<char>)> {
    let (_, (specs, marker)) = all_consuming(terminated(spec_list, space0))(raw.trim())
        .map_err(|_| ConversionError::MalformedVariable(format!("Cannot parse specs '{}'", raw)))?;
    Ok((specs.into_iter().map(str::to_string).collect(), marker))
}

/// Parses raw spec strings with shared flags
pub fn parse_specs(
    raw: &[String],
    extract_multiple: bool,
    use_group: bool,
    extra_segments: &[String],
) -> Vec<Specification> {
    raw.iter()
        .map(|spec| {
            Specification::parse_with_segments(spec, extract_multiple, use_group, extra_segments)
        })
        .collect()
}

/// Resolves candidate specs in order.
///
/// The first non-empty result wins and later specs are not evaluated. In combine
/// mode every spec is evaluated and the non-empty renderings are joined with a
/// single space.
pub fn resolve_specs(
    specs: &[Specification],
    data_source: &dyn DataSource,
    context: &ContextValues,
    combine_multiple: bool,
) -> Result<EvaluationResult> {
    if combine_multiple {
        let mut parts = Vec::new();
        for spec in specs {
            if let Some(value) = resolve_spec(spec, data_source, context)?.into_value() {
                parts.extend(
                    value
                        .items()
                        .filter_map(Value::as_text)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                );
            }
        }
        return Ok(if parts.is_empty() {
            EvaluationResult::empty()
        } else {
            EvaluationResult::simple(Value::String(parts.join(" ")))
        });
    }

    for spec in specs {
        let result = resolve_spec(spec, data_source, context)?;
        if !result.is_empty() {
            return Ok(result);
        }
    }
    Ok(EvaluationResult::empty())
}

fn resolve_spec(
    spec: &Specification,
    data_source: &dyn DataSource,
    context: &ContextValues,
) -> Result<EvaluationResult> {
    match spec {
        Specification::Simple(simple) => Ok(lookup_variable(simple, context)
            .map(EvaluationResult::simple)
            .unwrap_or_default()),
        Specification::Hl7(hl7) => data_source.extract_value(hl7, context),
    }
}

/// Looks a variable up in the context.
///
/// Order: the group-scoped key `name_<GROUP_ID>` when `use_group` is set, then the
/// fuzzy prefix scan when the reference is fuzzy, then the bare key. A subfield is
/// read from the value found.
pub fn lookup_variable(spec: &SimpleSpecification, context: &ContextValues) -> Option<Value> {
    let name = spec.variable.as_str();

    let grouped = if spec.use_group {
        context
            .group_id()
            .and_then(|group_id| context.value(&format!("{}_{}", name, group_id)).cloned())
    } else {
        None
    };

    let value = grouped
        .or_else(|| {
            if spec.fuzzy {
                fuzzy_lookup(name, context)
            } else {
                None
            }
        })
        .or_else(|| context.value(name).cloned());

    let value = match (&spec.subfield, value) {
        (Some(subfield), Some(value)) => value.get(subfield),
        (None, value) => value,
        (Some(_), None) => None,
    };

    if value.is_none() {
        debug!("No context value for {}", spec);
    }
    value.filter(|v| !v.is_empty())
}

fn fuzzy_lookup(prefix: &str, context: &ContextValues) -> Option<Value> {
    let mut values = Vec::new();
    for key in context.keys() {
        if !key.starts_with(prefix) || key == GROUP_ID_KEY {
            continue;
        }
        if let Some(value) = context.value(&key) {
            if !value.is_empty() {
                values.extend(value.clone().into_list().into_iter().filter(|v| !v.is_empty()));
            }
        }
    }

    if values.is_empty() {
        None
    } else {
        Some(Value::List(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_spec_list_with_alternatives() {
        match Variable::parse("id", "PID.3.1 | $fallback").unwrap() {
            Variable::Simple(base) => {
                assert_eq!(base.specs, vec!["PID.3.1", "$fallback"]);
                assert!(!base.extract_multiple);
                assert!(!base.combine_multiple);
            }
            other => panic!("Expected simple variable, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_combine_marker() {
        let variable = Variable::parse("name", "PID.5.2|PID.5.1 +").unwrap();
        assert!(variable.base().combine_multiple);
    }

    #[test]
    fn test_type_and_expression_is_malformed() {
        let result = Variable::parse("v", "STRING, PID.3, String.trim(v)");
        assert!(matches!(result, Err(ConversionError::MalformedVariable(_))));
    }

    #[test]
    fn test_segment_name_is_not_a_type() {
        match Variable::parse("pid", "PID, String.toString(pid)").unwrap() {
            Variable::Expression { base, expression } => {
                assert_eq!(base.specs, vec!["PID"]);
                assert_eq!(expression.source(), "String.toString(pid)");
            }
            other => panic!("Expected expression variable, got {:?}", other),
        }
    }
}

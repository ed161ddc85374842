// Script Parser
//
// This module implements the recursive-descent parser for script expressions.
//
//   program := call EOF
//   call    := IDENT "." IDENT "(" [ arg ( "," arg )* ] ")"
//   arg     := literal | IDENT | call

use crate::errors::ConversionError;
use crate::script::lexer::{Token, TokenType};
use std::fmt;

/// AST node types for script expressions
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptNode {
    // Literals
    StringLiteral(String),
    NumberLiteral(f64),
    BooleanLiteral(bool),
    NullLiteral,

    /// Caller variable
    Variable(String),

    /// Whitelisted function call
    Call {
        namespace: String,
        function: String,
        arguments: Vec<ScriptNode>,
    },
}

impl fmt::Display for ScriptNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptNode::StringLiteral(s) => write!(f, "'{}'", s),
            ScriptNode::NumberLiteral(n) => write!(f, "{}", n),
            ScriptNode::BooleanLiteral(b) => write!(f, "{}", b),
            ScriptNode::NullLiteral => write!(f, "null"),
            ScriptNode::Variable(name) => write!(f, "{}", name),
            ScriptNode::Call {
                namespace,
                function,
                arguments,
            } => {
                let rendered: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
                write!(f, "{}.{}({})", namespace, function, rendered.join(", "))
            }
        }
    }
}

/// Parser for script expressions
pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
}

impl<'a> Parser<'a> {
    /// Creates a new parser
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, current: 0 }
    }

    /// Parses a complete expression: exactly one call and nothing after it
    pub fn parse(&mut self) -> Result<ScriptNode, ConversionError> {
        if !self.check(TokenType::Identifier) {
            return Err(ConversionError::IllegalExpression(format!(
                "Expression must be a Namespace.function(...) call, found '{}'",
                self.peek().map(|t| t.lexeme.as_str()).unwrap_or("")
            )));
        }

        let node = self.call()?;

        if !self.is_at_end() {
            let token = self.peek().map(|t| t.lexeme.clone()).unwrap_or_default();
            return Err(ConversionError::ParserError(format!(
                "Unexpected '{}' after the call",
                token
            )));
        }

        Ok(node)
    }

    /// Checks if we've reached the end of the token stream
    fn is_at_end(&self) -> bool {
        match self.peek() {
            Some(token) => token.token_type == TokenType::EOF,
            None => true,
        }
    }

    /// Returns the current token without advancing
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    /// Returns the previous token
    fn previous(&self) -> Option<&Token> {
        self.current.checked_sub(1).and_then(|i| self.tokens.get(i))
    }

    /// Advances to the next token and returns the consumed one
    fn advance(&mut self) -> Option<&Token> {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    /// Checks if the current token matches the given type
    fn check(&self, token_type: TokenType) -> bool {
        self.peek().map(|t| t.token_type == token_type).unwrap_or(false)
    }

    /// Consumes the current token if it matches the given type
    fn match_token(&mut self, token_type: TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes a token of the expected type or fails with `message`
    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<Token, ConversionError> {
        if self.check(token_type) {
            if let Some(token) = self.advance() {
                return Ok(token.clone());
            }
        }

        let (lexeme, column) = self
            .peek()
            .map(|t| (t.lexeme.clone(), t.column))
            .unwrap_or_default();
        Err(ConversionError::ParserError(format!(
            "{} at column {}, found '{}'",
            message, column, lexeme
        )))
    }

    /// Parses `IDENT "." IDENT "(" args ")"`
    fn call(&mut self) -> Result<ScriptNode, ConversionError> {
        let namespace = self.consume(TokenType::Identifier, "Expected namespace")?;

        if !self.match_token(TokenType::Dot) {
            return Err(ConversionError::IllegalExpression(format!(
                "'{}' is not a Namespace.function(...) call",
                namespace.lexeme
            )));
        }

        let function = self.consume(TokenType::Identifier, "Expected function name")?;

        if !self.check(TokenType::LeftParen) {
            return Err(ConversionError::IllegalExpression(format!(
                "Property access '{}.{}' is not allowed",
                namespace.lexeme, function.lexeme
            )));
        }
        self.advance();

        let mut arguments = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                arguments.push(self.argument()?);
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenType::RightParen, "Expected ')' after arguments")?;

        Ok(ScriptNode::Call {
            namespace: namespace.lexeme,
            function: function.lexeme,
            arguments,
        })
    }

    /// Parses one call argument
    fn argument(&mut self) -> Result<ScriptNode, ConversionError> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => {
                return Err(ConversionError::ParserError(
                    "Unexpected end of expression".to_string(),
                ))
            }
        };

        match token.token_type {
            TokenType::StringLiteral => {
                self.advance();
                Ok(ScriptNode::StringLiteral(token.lexeme))
            }
            TokenType::NumberLiteral => {
                self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| {
                    ConversionError::ParserError(format!("Invalid number '{}'", token.lexeme))
                })?;
                Ok(ScriptNode::NumberLiteral(value))
            }
            TokenType::BooleanLiteral => {
                self.advance();
                Ok(ScriptNode::BooleanLiteral(token.lexeme == "true"))
            }
            TokenType::NullLiteral => {
                self.advance();
                Ok(ScriptNode::NullLiteral)
            }
            TokenType::Identifier => {
                let is_call = self
                    .tokens
                    .get(self.current + 1)
                    .map(|t| t.token_type == TokenType::Dot)
                    .unwrap_or(false);
                if is_call {
                    self.call()
                } else {
                    self.advance();
                    Ok(ScriptNode::Variable(token.lexeme))
                }
            }
            _ => Err(ConversionError::ParserError(format!(
                "Unexpected '{}' at column {}",
                token.lexeme, token.column
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::tokenize;

    fn parse(input: &str) -> Result<ScriptNode, ConversionError> {
        let tokens = tokenize(input)?;
        Parser::new(&tokens).parse()
    }

    #[test]
    fn test_nested_call() {
        let node = parse("StringUtils.upperCase(String.join('-', a, 'b'))").unwrap();
        assert_eq!(
            node.to_string(),
            "StringUtils.upperCase(String.join('-', a, 'b'))"
        );
    }

    #[test]
    fn test_bare_identifier_rejected() {
        assert!(matches!(
            parse("value"),
            Err(ConversionError::IllegalExpression(_))
        ));
    }

    #[test]
    fn test_property_access_rejected() {
        assert!(matches!(
            parse("System.out"),
            Err(ConversionError::IllegalExpression(_))
        ));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(matches!(
            parse("String.trim(a) b"),
            Err(ConversionError::ParserError(_))
        ));
    }
}

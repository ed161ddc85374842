// Script Lexer
//
// This module implements the lexical analysis for template script expressions.
// Only identifiers, literals and the call punctuation are recognised; statement
// separators and control-flow keywords are rejected here.

use crate::errors::ConversionError;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;

/// Words that never reach the parser
pub const RESERVED_WORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "var", "let", "function", "return", "new", "import",
    "class",
];

/// Token types for script expressions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenType {
    // Literals
    Identifier,
    StringLiteral,
    NumberLiteral,
    BooleanLiteral,
    NullLiteral,

    // Delimiters
    Dot,        // .
    LeftParen,  // (
    RightParen, // )
    Comma,      // ,

    // End of input
    EOF,
}

/// A token in a script expression
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub position: usize,
    pub column: usize,
}

/// Lexer for script expressions
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
    column: usize,
    keywords: HashMap<&'static str, TokenType>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input
    pub fn new(input: &'a str) -> Self {
        let mut keywords = HashMap::new();
        keywords.insert("true", TokenType::BooleanLiteral);
        keywords.insert("false", TokenType::BooleanLiteral);
        keywords.insert("null", TokenType::NullLiteral);

        Lexer {
            chars: input.chars().peekable(),
            position: 0,
            column: 1,
            keywords,
        }
    }

    /// Advances the lexer by one character
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
            self.column += 1;
        }
        c
    }

    /// Peeks at the next character without advancing
    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    /// Creates a token ending at the current position
    fn make_token(&self, token_type: TokenType, lexeme: String) -> Token {
        let len = lexeme.chars().count();
        Token {
            token_type,
            lexeme,
            position: self.position - len,
            column: self.column - len,
        }
    }

    /// Skips whitespace characters
    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.advance();
        }
    }

    /// Tokenizes an identifier or keyword
    fn identifier(&mut self) -> Result<Token, ConversionError> {
        let start_pos = self.position;
        let start_column = self.column;

        let mut identifier = String::new();
        while let Some(&c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                identifier.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if RESERVED_WORDS.contains(&identifier.as_str()) {
            return Err(ConversionError::IllegalExpression(format!(
                "Reserved word '{}' at column {}",
                identifier, start_column
            )));
        }

        let token_type = self
            .keywords
            .get(identifier.as_str())
            .copied()
            .unwrap_or(TokenType::Identifier);

        Ok(Token {
            token_type,
            lexeme: identifier,
            position: start_pos,
            column: start_column,
        })
    }

    /// Tokenizes a number literal, with an optional leading minus sign
    fn number(&mut self) -> Result<Token, ConversionError> {
        let start_pos = self.position;
        let start_column = self.column;

        let mut number = String::new();
        if let Some(&'-') = self.peek() {
            number.push('-');
            self.advance();
        }

        let mut has_decimal = false;
        while let Some(&c) = self.peek() {
            if c.is_ascii_digit() {
                number.push(c);
                self.advance();
            } else if c == '.' && !has_decimal {
                has_decimal = true;
                number.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if number == "-" || number.ends_with('.') {
            return Err(ConversionError::LexerError(format!(
                "Invalid number literal '{}' at column {}",
                number, start_column
            )));
        }

        Ok(Token {
            token_type: TokenType::NumberLiteral,
            lexeme: number,
            position: start_pos,
            column: start_column,
        })
    }

    /// Tokenizes a string literal delimited by `quote`
    fn string(&mut self, quote: char) -> Result<Token, ConversionError> {
        let start_pos = self.position;
        let start_column = self.column;

        // Skip the opening quote
        self.advance();

        let mut string = String::new();
        while let Some(c) = self.advance() {
            if c == quote {
                return Ok(Token {
                    token_type: TokenType::StringLiteral,
                    lexeme: string,
                    position: start_pos,
                    column: start_column,
                });
            }

            if c == '\\' {
                match self.advance() {
                    Some('n') => string.push('\n'),
                    Some('r') => string.push('\r'),
                    Some('t') => string.push('\t'),
                    Some(escaped @ ('\'' | '"' | '\\')) => string.push(escaped),
                    Some(escaped) => {
                        return Err(ConversionError::LexerError(format!(
                            "Invalid escape sequence '\\{}' at column {}",
                            escaped, self.column
                        )))
                    }
                    None => break,
                }
            } else {
                string.push(c);
            }
        }

        Err(ConversionError::LexerError(format!(
            "Unterminated string literal at column {}",
            start_column
        )))
    }

    /// Scans the next token
    pub fn scan_token(&mut self) -> Result<Token, ConversionError> {
        self.skip_whitespace();

        let Some(&c) = self.peek() else {
            return Ok(self.make_token(TokenType::EOF, String::new()));
        };

        match c {
            '(' => {
                self.advance();
                Ok(self.make_token(TokenType::LeftParen, "(".to_string()))
            }
            ')' => {
                self.advance();
                Ok(self.make_token(TokenType::RightParen, ")".to_string()))
            }
            ',' => {
                self.advance();
                Ok(self.make_token(TokenType::Comma, ",".to_string()))
            }
            '.' => {
                self.advance();
                Ok(self.make_token(TokenType::Dot, ".".to_string()))
            }
            ';' => Err(ConversionError::IllegalExpression(format!(
                "Statement separator ';' at column {}",
                self.column
            ))),
            '\'' | '"' => self.string(c),
            '0'..='9' | '-' => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),
            _ => Err(ConversionError::LexerError(format!(
                "Unexpected character '{}' at column {}",
                c, self.column
            ))),
        }
    }
}

/// Tokenizes a script expression
pub fn tokenize(input: &str) -> Result<Vec<Token>, ConversionError> {
    // Checked up front so a separator inside a literal is rejected as well
    if input.contains(';') {
        return Err(ConversionError::IllegalExpression(format!(
            "Expression must not contain ';': {}",
            input
        )));
    }

    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();

    loop {
        let token = lexer.scan_token()?;
        let is_eof = token.token_type == TokenType::EOF;
        tokens.push(token);

        if is_eof {
            break;
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_call() {
        let tokens = tokenize("String.toString()").unwrap();
        let types: Vec<TokenType> = tokens.iter().map(|t| t.token_type).collect();
        assert_eq!(
            types,
            vec![
                TokenType::Identifier,
                TokenType::Dot,
                TokenType::Identifier,
                TokenType::LeftParen,
                TokenType::RightParen,
                TokenType::EOF,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#"'it\'s' "a\"b""#).unwrap();
        assert_eq!(tokens[0].lexeme, "it's");
        assert_eq!(tokens[1].lexeme, "a\"b");
    }

    #[test]
    fn test_negative_decimal() {
        let tokens = tokenize("-12.5").unwrap();
        assert_eq!(tokens[0].token_type, TokenType::NumberLiteral);
        assert_eq!(tokens[0].lexeme, "-12.5");
    }
}

//! Parse errors and their constructors.

use eiko_foundation::Span;
use eiko_lexer::Token;
use std::fmt;

/// Parse error with source location and context.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A specific token was required but something else was found.
    UnexpectedToken,
    /// Input ended while a construct was still open.
    UnexpectedEof,
    /// Tokens are present but violate the grammar structurally.
    InvalidSyntax,
}

impl ParseError {
    pub fn expected_token(expected: &Token, found: &Token, span: Span) -> Self {
        let kind = if matches!(found, Token::Eof) {
            ParseErrorKind::UnexpectedEof
        } else {
            ParseErrorKind::UnexpectedToken
        };
        Self {
            kind,
            span,
            message: format!(
                "expected {}, found {}",
                expected.describe(),
                found.describe()
            ),
        }
    }

    pub fn unexpected_token(found: &Token, context: &str, span: Span) -> Self {
        let kind = if matches!(found, Token::Eof) {
            ParseErrorKind::UnexpectedEof
        } else {
            ParseErrorKind::UnexpectedToken
        };
        Self {
            kind,
            span,
            message: format!("unexpected {}: {}", found.describe(), context),
        }
    }

    pub fn invalid_syntax(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: ParseErrorKind::InvalidSyntax,
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

//! Token stream wrapper for the hand-written parser.

use eiko_foundation::Span;
use eiko_lexer::{Spanned, Token};

use crate::error::ParseError;

/// Token cursor with lookahead and span tracking.
///
/// The lexer guarantees a trailing `Eof` token, so `peek` always has
/// something to return.
pub struct TokenStream<'src> {
    tokens: &'src [Spanned],
    pos: usize,
}

impl<'src> TokenStream<'src> {
    pub fn new(tokens: &'src [Spanned]) -> Self {
        assert!(
            matches!(tokens.last().map(|s| &s.token), Some(Token::Eof)),
            "token stream must end with Eof"
        );
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    pub fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    /// Consume and return the current token.
    pub fn advance(&mut self) -> &Spanned {
        let spanned = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        spanned
    }

    /// Does the current token have the same discriminant as `expected`?
    pub fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(expected)
    }

    /// Advance over `expected` if it is next; report whether it was.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Require `expected` next, consuming it.
    pub fn expect(&mut self, expected: Token) -> Result<Span, ParseError> {
        if self.check(&expected) {
            Ok(self.advance().span)
        } else {
            Err(ParseError::expected_token(
                &expected,
                self.peek(),
                self.current_span(),
            ))
        }
    }

    /// Require an identifier next; returns its name and span.
    pub fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        match self.peek() {
            Token::Ident(_) => {
                let spanned = self.advance();
                let Token::Ident(name) = &spanned.token else {
                    unreachable!()
                };
                Ok((name.clone(), spanned.span))
            }
            other => Err(ParseError::unexpected_token(
                other,
                "expected an identifier",
                self.current_span(),
            )),
        }
    }

    pub fn at_end(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Span covering everything from `start` (a token position) to the last
    /// consumed token.
    pub fn span_from(&self, start: usize) -> Span {
        let start_span = self.tokens[start.min(self.tokens.len() - 1)].span;
        let end_span = if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            start_span
        };
        Span::new(start_span.file_id, start_span.start, end_span.end)
    }

    pub fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    /// Skip to the start of the next top-level statement after an error.
    ///
    /// Consumes tokens until a `Newline` at the current block depth,
    /// swallowing whole nested blocks along the way.
    pub fn synchronize(&mut self) {
        let mut depth: usize = 0;
        while !self.at_end() {
            match self.peek() {
                Token::Indent => {
                    depth += 1;
                    self.advance();
                }
                Token::Dedent => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.advance();
                }
                Token::Newline => {
                    self.advance();
                    if depth == 0 {
                        return;
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }
    }
}

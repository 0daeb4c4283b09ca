//! Parser for the Eiko language.
//!
//! Hand-written recursive descent with Pratt precedence climbing for
//! expressions and a dedicated sub-grammar for type annotations. Errors
//! are reported with the original span; a failed top-level statement does
//! not abort the parse — the parser synchronizes to the next statement
//! boundary and continues.

pub mod ast;
pub mod decl;
pub mod error;
pub mod expr;
pub mod stream;
pub mod types;

use eiko_lexer::{Spanned, Token};

pub use ast::Module;
pub use error::{ParseError, ParseErrorKind};
pub use stream::TokenStream;

/// Parse a token stream into a module.
///
/// Returns the AST built from the statements that parsed, plus every error
/// encountered along the way. Callers treat a non-empty error list as a
/// failed compilation even though a partial AST is available.
pub fn parse_module(tokens: &[Spanned]) -> (Module, Vec<ParseError>) {
    let mut stream = TokenStream::new(tokens);
    let mut statements = Vec::new();
    let mut errors = Vec::new();

    while !stream.at_end() {
        if stream.eat(&Token::Newline) {
            continue;
        }
        match decl::parse_statement(&mut stream) {
            Ok(stmt) => statements.push(stmt),
            Err(err) => {
                errors.push(err);
                stream.synchronize();
            }
        }
    }

    (Module { statements }, errors)
}

/// Convenience: lex and parse a source string in one step.
pub fn parse_source(source: &str, file_id: u16) -> Result<Module, Vec<ParseError>> {
    let tokens = eiko_lexer::lex(source, file_id).map_err(|e| {
        vec![ParseError {
            kind: ParseErrorKind::InvalidSyntax,
            span: e.span,
            message: e.message,
        }]
    })?;
    let (module, errors) = parse_module(&tokens);
    if errors.is_empty() {
        Ok(module)
    } else {
        Err(errors)
    }
}

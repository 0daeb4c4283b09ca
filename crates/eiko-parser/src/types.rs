//! Type-expression sub-grammar.
//!
//! Annotations, typedef bases and constructor parameter types go through
//! this grammar instead of the value-expression parser, so `list[int]` in
//! type position can never be confused with an index expression.

use eiko_lexer::Token;

use crate::ast::{TypeExpr, TypeExprKind};
use crate::error::ParseError;
use crate::stream::TokenStream;

/// Parse a type annotation: dotted name with optional `[...]` arguments.
pub fn parse_type_expr(stream: &mut TokenStream) -> Result<TypeExpr, ParseError> {
    let start = stream.current_pos();
    let name = parse_type_name(stream)?;

    if stream.check(&Token::LBracket) {
        stream.advance();
        let mut args = Vec::new();
        while !stream.check(&Token::RBracket) {
            args.push(parse_type_expr(stream)?);
            if !stream.check(&Token::RBracket) {
                stream.expect(Token::Comma)?;
            }
        }
        stream.expect(Token::RBracket)?;
        if args.is_empty() {
            return Err(ParseError::invalid_syntax(
                "type arguments cannot be empty",
                stream.span_from(start),
            ));
        }
        return Ok(TypeExpr {
            kind: TypeExprKind::Generic { name, args },
            span: stream.span_from(start),
        });
    }

    Ok(TypeExpr {
        kind: TypeExprKind::Name(name),
        span: stream.span_from(start),
    })
}

/// Dotted type name; `None` is allowed as a type.
fn parse_type_name(stream: &mut TokenStream) -> Result<Vec<String>, ParseError> {
    let mut path = Vec::new();
    if stream.eat(&Token::NoneKw) {
        return Ok(vec!["None".to_string()]);
    }
    let (first, _) = stream.expect_ident()?;
    path.push(first);
    while stream.check(&Token::Dot) {
        stream.advance();
        let (next, _) = stream.expect_ident()?;
        path.push(next);
    }
    Ok(path)
}

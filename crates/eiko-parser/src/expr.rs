//! Expression parsing: Pratt precedence climbing over the token stream.

use eiko_lexer::Token;

use crate::ast::{BinaryOp, CallArg, Expr, ExprKind, FStringPart, UnaryOp};
use crate::error::ParseError;
use crate::stream::TokenStream;

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

/// Binary operator metadata: (precedence, associativity, op).
///
/// Higher precedence binds tighter. Single source of truth for the
/// expression grammar.
fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinaryOp)> {
    match token {
        Token::Or => Some((10, Assoc::Left, BinaryOp::Or)),
        Token::And => Some((20, Assoc::Left, BinaryOp::And)),
        Token::EqEq => Some((30, Assoc::Left, BinaryOp::Eq)),
        Token::NotEq => Some((30, Assoc::Left, BinaryOp::Ne)),
        Token::Lt => Some((30, Assoc::Left, BinaryOp::Lt)),
        Token::LtEq => Some((30, Assoc::Left, BinaryOp::Le)),
        Token::Gt => Some((30, Assoc::Left, BinaryOp::Gt)),
        Token::GtEq => Some((30, Assoc::Left, BinaryOp::Ge)),
        Token::In => Some((30, Assoc::Left, BinaryOp::In)),
        Token::Plus => Some((40, Assoc::Left, BinaryOp::Add)),
        Token::Minus => Some((40, Assoc::Left, BinaryOp::Sub)),
        Token::Star => Some((50, Assoc::Left, BinaryOp::Mul)),
        Token::Slash => Some((50, Assoc::Left, BinaryOp::Div)),
        Token::DoubleSlash => Some((50, Assoc::Left, BinaryOp::IntDiv)),
        Token::DoubleStar => Some((70, Assoc::Right, BinaryOp::Pow)),
        _ => None,
    }
}

/// Parse a full expression.
pub fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    parse_pratt(stream, 0)
}

fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut left = parse_prefix(stream)?;

    while let Some((prec, assoc, op)) = binary_op_info(stream.peek()) {
        if prec < min_prec {
            break;
        }
        stream.advance();

        let next_prec = if assoc == Assoc::Left { prec + 1 } else { prec };
        let right = parse_pratt(stream, next_prec)?;
        let span = stream.span_from(start);
        left = Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        );
    }

    Ok(left)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    match stream.peek() {
        Token::Minus => {
            stream.advance();
            // `**` binds tighter than unary minus: -2 ** 2 == -(2 ** 2).
            let operand = parse_pratt(stream, 70)?;
            let span = stream.span_from(start);
            Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                span,
            ))
        }
        Token::Not => {
            stream.advance();
            // `not` binds looser than comparisons: not a == b == not (a == b).
            let operand = parse_pratt(stream, 25)?;
            let span = stream.span_from(start);
            Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ))
        }
        _ => parse_postfix(stream),
    }
}

/// Postfix: attribute access, calls, indexing.
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut expr = parse_atom(stream)?;

    loop {
        match stream.peek() {
            Token::Dot => {
                stream.advance();
                let (name, _) = stream.expect_ident()?;
                let span = stream.span_from(start);
                expr = Expr::new(
                    ExprKind::Attr {
                        object: Box::new(expr),
                        name,
                    },
                    span,
                );
            }
            Token::LParen => {
                let args = parse_call_args(stream)?;
                let span = stream.span_from(start);
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    span,
                );
            }
            Token::LBracket => {
                stream.advance();
                let index = parse_expr(stream)?;
                stream.expect(Token::RBracket)?;
                let span = stream.span_from(start);
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            }
            _ => break,
        }
    }

    Ok(expr)
}

fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let span = stream.current_span();
    let kind = match stream.peek().clone() {
        Token::Int(value) => {
            stream.advance();
            ExprKind::Int(value)
        }
        Token::Float(value) => {
            stream.advance();
            ExprKind::Float(value)
        }
        Token::Str(value) => {
            stream.advance();
            ExprKind::Str(value)
        }
        Token::True => {
            stream.advance();
            ExprKind::Bool(true)
        }
        Token::False => {
            stream.advance();
            ExprKind::Bool(false)
        }
        Token::NoneKw => {
            stream.advance();
            ExprKind::None
        }
        Token::SelfKw => {
            stream.advance();
            ExprKind::SelfRef
        }
        Token::Ident(name) => {
            stream.advance();
            ExprKind::Ident(name)
        }
        Token::FStringStart => return parse_fstring(stream),
        Token::LParen => {
            stream.advance();
            let inner = parse_expr(stream)?;
            stream.expect(Token::RParen)?;
            return Ok(inner);
        }
        Token::LBracket => return parse_list(stream),
        Token::LBrace => return parse_dict(stream),
        other => {
            return Err(ParseError::unexpected_token(
                &other,
                "expected an expression",
                span,
            ));
        }
    };
    Ok(Expr::new(kind, span))
}

/// `callee(arg, name=arg, ...)` — trailing comma permitted.
fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<CallArg>, ParseError> {
    stream.expect(Token::LParen)?;

    let mut args = Vec::new();
    while !stream.check(&Token::RParen) {
        let arg_start = stream.current_pos();
        // Keyword argument: `name = expr`.
        let name = if matches!(stream.peek(), Token::Ident(_))
            && matches!(stream.peek_nth(1), Token::Assign)
        {
            let (name, _) = stream.expect_ident()?;
            stream.expect(Token::Assign)?;
            Some(name)
        } else {
            None
        };
        let value = parse_expr(stream)?;
        args.push(CallArg {
            name,
            value,
            span: stream.span_from(arg_start),
        });
        if !stream.check(&Token::RParen) {
            stream.expect(Token::Comma)?;
        }
    }

    stream.expect(Token::RParen)?;
    Ok(args)
}

fn parse_list(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::LBracket)?;

    let mut elements = Vec::new();
    while !stream.check(&Token::RBracket) {
        elements.push(parse_expr(stream)?);
        if !stream.check(&Token::RBracket) {
            stream.expect(Token::Comma)?;
        }
    }
    stream.expect(Token::RBracket)?;
    Ok(Expr::new(ExprKind::List(elements), stream.span_from(start)))
}

fn parse_dict(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::LBrace)?;

    let mut pairs = Vec::new();
    while !stream.check(&Token::RBrace) {
        let key = parse_expr(stream)?;
        stream.expect(Token::Colon)?;
        let value = parse_expr(stream)?;
        pairs.push((key, value));
        if !stream.check(&Token::RBrace) {
            stream.expect(Token::Comma)?;
        }
    }
    stream.expect(Token::RBrace)?;
    Ok(Expr::new(ExprKind::Dict(pairs), stream.span_from(start)))
}

/// Reassemble an f-string from the lexer's fragment tokens.
fn parse_fstring(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::FStringStart)?;

    let mut parts = Vec::new();
    loop {
        match stream.peek().clone() {
            Token::FStringLit(text) => {
                stream.advance();
                parts.push(FStringPart::Lit(text));
            }
            Token::FStringExprStart => {
                stream.advance();
                let expr = parse_expr(stream)?;
                stream.expect(Token::FStringExprEnd)?;
                parts.push(FStringPart::Expr(expr));
            }
            Token::FStringEnd => {
                stream.advance();
                break;
            }
            other => {
                return Err(ParseError::unexpected_token(
                    &other,
                    "inside f-string",
                    stream.current_span(),
                ));
            }
        }
    }
    Ok(Expr::new(ExprKind::FString(parts), stream.span_from(start)))
}

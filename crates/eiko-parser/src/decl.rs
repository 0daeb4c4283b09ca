//! Statement and declaration parsing.

use eiko_lexer::Token;

use crate::ast::{
    AssignTarget, ConstructorDecl, Decorator, EnumDecl, Expr, ExprKind, IfStmt, Param,
    PropertyDecl, ResourceDecl, Stmt, StmtKind, TypedefDecl,
};
use crate::error::ParseError;
use crate::expr::parse_expr;
use crate::stream::TokenStream;
use crate::types::parse_type_expr;

/// Parse one statement at module or block scope.
pub fn parse_statement(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    match stream.peek() {
        Token::At => {
            let decorators = parse_decorators(stream)?;
            match stream.peek() {
                Token::Resource => parse_resource(stream, decorators),
                other => Err(ParseError::unexpected_token(
                    other,
                    "decorators at this level must be followed by a resource definition",
                    stream.current_span(),
                )),
            }
        }
        Token::Import => parse_import(stream),
        Token::From => parse_from_import(stream),
        Token::Resource => parse_resource(stream, Vec::new()),
        Token::Typedef => parse_typedef(stream),
        Token::Enum => parse_enum(stream),
        Token::If => parse_if(stream),
        Token::For => parse_for(stream),
        _ => parse_expr_or_assign(stream),
    }
}

/// Statements are newline-terminated.
fn end_statement(stream: &mut TokenStream) -> Result<(), ParseError> {
    stream.expect(Token::Newline)?;
    Ok(())
}

/// `: NEWLINE INDENT stmt* DEDENT`
fn parse_block(stream: &mut TokenStream) -> Result<Vec<Stmt>, ParseError> {
    stream.expect(Token::Colon)?;
    stream.expect(Token::Newline)?;
    stream.expect(Token::Indent)?;

    let mut statements = Vec::new();
    while !stream.check(&Token::Dedent) && !stream.at_end() {
        statements.push(parse_statement(stream)?);
    }
    stream.expect(Token::Dedent)?;
    Ok(statements)
}

fn parse_import(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Import)?;

    let path = parse_dotted_name(stream)?;
    let alias = if stream.eat(&Token::As) {
        Some(stream.expect_ident()?.0)
    } else {
        None
    };
    end_statement(stream)?;
    Ok(Stmt::new(
        StmtKind::Import { path, alias },
        stream.span_from(start),
    ))
}

fn parse_from_import(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::From)?;

    // Leading dots select relative resolution; `...` lexes as one token.
    let mut dots = 0;
    loop {
        if stream.eat(&Token::Dot) {
            dots += 1;
        } else if stream.eat(&Token::Ellipsis) {
            dots += 3;
        } else {
            break;
        }
    }

    let path = if matches!(stream.peek(), Token::Ident(_)) {
        parse_dotted_name(stream)?
    } else {
        Vec::new()
    };
    if dots == 0 && path.is_empty() {
        return Err(ParseError::invalid_syntax(
            "from-import needs a module path",
            stream.current_span(),
        ));
    }

    stream.expect(Token::Import)?;
    let mut names = Vec::new();
    loop {
        let (name, _) = stream.expect_ident()?;
        let alias = if stream.eat(&Token::As) {
            Some(stream.expect_ident()?.0)
        } else {
            None
        };
        names.push((name, alias));
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    end_statement(stream)?;
    Ok(Stmt::new(
        StmtKind::FromImport { dots, path, names },
        stream.span_from(start),
    ))
}

fn parse_dotted_name(stream: &mut TokenStream) -> Result<Vec<String>, ParseError> {
    let mut path = vec![stream.expect_ident()?.0];
    while stream.eat(&Token::Dot) {
        path.push(stream.expect_ident()?.0);
    }
    Ok(path)
}

fn parse_typedef(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Typedef)?;
    let (name, _) = stream.expect_ident()?;
    let base = parse_type_expr(stream)?;
    let condition = if stream.eat(&Token::If) {
        Some(parse_expr(stream)?)
    } else {
        None
    };
    end_statement(stream)?;
    Ok(Stmt::new(
        StmtKind::TypedefDef(TypedefDecl {
            name,
            base,
            condition,
        }),
        stream.span_from(start),
    ))
}

fn parse_enum(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Enum)?;
    let (name, _) = stream.expect_ident()?;

    stream.expect(Token::Colon)?;
    stream.expect(Token::Newline)?;
    stream.expect(Token::Indent)?;
    let mut members = Vec::new();
    while !stream.check(&Token::Dedent) && !stream.at_end() {
        members.push(stream.expect_ident()?.0);
        end_statement(stream)?;
    }
    stream.expect(Token::Dedent)?;

    if members.is_empty() {
        return Err(ParseError::invalid_syntax(
            "enum must declare at least one member",
            stream.span_from(start),
        ));
    }
    Ok(Stmt::new(
        StmtKind::EnumDef(EnumDecl { name, members }),
        stream.span_from(start),
    ))
}

fn parse_if(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::If)?;
    let stmt = parse_if_tail(stream, start)?;
    Ok(stmt)
}

/// Shared by `if` and `elif`: condition, block, optional else chain.
fn parse_if_tail(stream: &mut TokenStream, start: usize) -> Result<Stmt, ParseError> {
    let condition = parse_expr(stream)?;
    let body = parse_block(stream)?;

    let orelse = if stream.check(&Token::Elif) {
        let elif_start = stream.current_pos();
        stream.advance();
        vec![parse_if_tail(stream, elif_start)?]
    } else if stream.eat(&Token::Else) {
        parse_block(stream)?
    } else {
        Vec::new()
    };

    Ok(Stmt::new(
        StmtKind::If(IfStmt {
            condition,
            body,
            orelse,
        }),
        stream.span_from(start),
    ))
}

fn parse_for(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::For)?;
    let (var, _) = stream.expect_ident()?;
    stream.expect(Token::In)?;
    let iterable = parse_expr(stream)?;
    let body = parse_block(stream)?;
    Ok(Stmt::new(
        StmtKind::For {
            var,
            iterable,
            body,
        },
        stream.span_from(start),
    ))
}

/// Expression statement, assignment, or forward declaration.
fn parse_expr_or_assign(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    let expr = parse_expr(stream)?;

    if stream.check(&Token::Colon) {
        // Annotated: `name: type` or `name: type = value`.
        let ExprKind::Ident(name) = &expr.kind else {
            return Err(ParseError::invalid_syntax(
                "only a plain name can carry a type annotation",
                expr.span,
            ));
        };
        let name = name.clone();
        stream.advance();
        let annotation = parse_type_expr(stream)?;

        if stream.eat(&Token::Assign) {
            let value = parse_expr(stream)?;
            end_statement(stream)?;
            return Ok(Stmt::new(
                StmtKind::Assign {
                    target: AssignTarget::Name(name),
                    annotation: Some(annotation),
                    value,
                },
                stream.span_from(start),
            ));
        }

        end_statement(stream)?;
        return Ok(Stmt::new(
            StmtKind::Declare { name, annotation },
            stream.span_from(start),
        ));
    }

    if stream.eat(&Token::Assign) {
        let target = expr_to_target(expr)?;
        let value = parse_expr(stream)?;
        end_statement(stream)?;
        return Ok(Stmt::new(
            StmtKind::Assign {
                target,
                annotation: None,
                value,
            },
            stream.span_from(start),
        ));
    }

    end_statement(stream)?;
    Ok(Stmt::new(StmtKind::ExprStmt(expr), stream.span_from(start)))
}

fn expr_to_target(expr: Expr) -> Result<AssignTarget, ParseError> {
    match expr.kind {
        ExprKind::Ident(name) => Ok(AssignTarget::Name(name)),
        ExprKind::Attr { object, name } => Ok(AssignTarget::Attr {
            object: *object,
            name,
        }),
        _ => Err(ParseError::invalid_syntax(
            "cannot assign to this expression",
            expr.span,
        )),
    }
}

/// `@name` or `@name(args...)`, one per line.
fn parse_decorators(stream: &mut TokenStream) -> Result<Vec<Decorator>, ParseError> {
    let mut decorators = Vec::new();
    while stream.check(&Token::At) {
        let start = stream.current_pos();
        stream.advance();
        let (name, _) = stream.expect_ident()?;
        let args = if stream.check(&Token::LParen) {
            let mut args = Vec::new();
            stream.advance();
            while !stream.check(&Token::RParen) {
                args.push(parse_expr(stream)?);
                if !stream.check(&Token::RParen) {
                    stream.expect(Token::Comma)?;
                }
            }
            stream.expect(Token::RParen)?;
            args
        } else {
            Vec::new()
        };
        end_statement(stream)?;
        decorators.push(Decorator {
            name,
            args,
            span: stream.span_from(start),
        });
    }
    Ok(decorators)
}

fn parse_resource(
    stream: &mut TokenStream,
    decorators: Vec<Decorator>,
) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Resource)?;
    let (name, _) = stream.expect_ident()?;

    let parent = if stream.eat(&Token::LParen) {
        let parent = parse_type_expr(stream)?;
        stream.expect(Token::RParen)?;
        Some(parent)
    } else {
        None
    };

    stream.expect(Token::Colon)?;

    // `resource A(B): ...` on one line is the inherit-unchanged form.
    if stream.eat(&Token::Ellipsis) {
        end_statement(stream)?;
        return Ok(Stmt::new(
            StmtKind::ResourceDef(ResourceDecl {
                name,
                parent,
                decorators,
                properties: Vec::new(),
                constructors: Vec::new(),
                inherit_only: true,
            }),
            stream.span_from(start),
        ));
    }

    stream.expect(Token::Newline)?;
    stream.expect(Token::Indent)?;

    let mut properties = Vec::new();
    let mut constructors = Vec::new();
    let mut inherit_only = false;

    while !stream.check(&Token::Dedent) && !stream.at_end() {
        match stream.peek() {
            Token::Ellipsis => {
                stream.advance();
                end_statement(stream)?;
                inherit_only = true;
            }
            Token::Promise => {
                let prop_start = stream.current_pos();
                stream.advance();
                let (prop_name, _) = stream.expect_ident()?;
                stream.expect(Token::Colon)?;
                let ty = parse_type_expr(stream)?;
                end_statement(stream)?;
                properties.push(PropertyDecl {
                    name: prop_name,
                    ty,
                    default: None,
                    promise: true,
                    span: stream.span_from(prop_start),
                });
            }
            Token::Ident(_) => {
                let prop_start = stream.current_pos();
                let (prop_name, _) = stream.expect_ident()?;
                stream.expect(Token::Colon)?;
                let ty = parse_type_expr(stream)?;
                let default = if stream.eat(&Token::Assign) {
                    Some(parse_expr(stream)?)
                } else {
                    None
                };
                end_statement(stream)?;
                properties.push(PropertyDecl {
                    name: prop_name,
                    ty,
                    default,
                    promise: false,
                    span: stream.span_from(prop_start),
                });
            }
            Token::Def | Token::Implement | Token::At => {
                constructors.push(parse_constructor(stream)?);
            }
            other => {
                return Err(ParseError::unexpected_token(
                    other,
                    "expected a property, constructor, or '...' in resource body",
                    stream.current_span(),
                ));
            }
        }
    }
    stream.expect(Token::Dedent)?;

    if inherit_only && !properties.is_empty() {
        return Err(ParseError::invalid_syntax(
            "a '...' body permits constructor overrides only",
            stream.span_from(start),
        ));
    }

    Ok(Stmt::new(
        StmtKind::ResourceDef(ResourceDecl {
            name,
            parent,
            decorators,
            properties,
            constructors,
            inherit_only,
        }),
        stream.span_from(start),
    ))
}

/// `def __init__(self, ...)` or `implement name(self, ...)`, optionally
/// preceded by `@constraint(expr)`.
fn parse_constructor(stream: &mut TokenStream) -> Result<ConstructorDecl, ParseError> {
    let start = stream.current_pos();
    let decorators = parse_decorators(stream)?;
    let mut constraint = None;
    for decorator in decorators {
        if decorator.name == "constraint" && decorator.args.len() == 1 {
            if constraint.is_some() {
                return Err(ParseError::invalid_syntax(
                    "a constructor can carry at most one @constraint",
                    decorator.span,
                ));
            }
            constraint = Some(decorator.args.into_iter().next().expect("checked len"));
        } else {
            return Err(ParseError::invalid_syntax(
                format!(
                    "decorator '@{}' is not valid on a constructor",
                    decorator.name
                ),
                decorator.span,
            ));
        }
    }

    let name = match stream.peek() {
        Token::Def => {
            stream.advance();
            stream.expect_ident()?.0
        }
        Token::Implement => {
            stream.advance();
            stream.expect_ident()?.0
        }
        other => {
            return Err(ParseError::unexpected_token(
                other,
                "expected 'def' or 'implement'",
                stream.current_span(),
            ));
        }
    };

    stream.expect(Token::LParen)?;
    stream.expect(Token::SelfKw)?;

    let mut params = Vec::new();
    while stream.eat(&Token::Comma) {
        if stream.check(&Token::RParen) {
            break;
        }
        let param_start = stream.current_pos();
        let (param_name, _) = stream.expect_ident()?;
        let ty = if stream.eat(&Token::Colon) {
            Some(parse_type_expr(stream)?)
        } else {
            None
        };
        let default = if stream.eat(&Token::Assign) {
            Some(parse_expr(stream)?)
        } else {
            None
        };
        params.push(Param {
            name: param_name,
            ty,
            default,
            span: stream.span_from(param_start),
        });
    }
    stream.expect(Token::RParen)?;

    let body = parse_block(stream)?;
    Ok(ConstructorDecl {
        name,
        params,
        body,
        constraint,
        span: stream.span_from(start),
    })
}

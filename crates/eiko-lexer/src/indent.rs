//! Indentation pass over the raw logos token stream.
//!
//! Tracks a stack of indentation widths, emits `Indent`/`Dedent` pairs,
//! suppresses line structure inside open brackets, and expands f-strings.

use eiko_foundation::Span;
use logos::Logos;

use crate::{LexError, Spanned, Token};

/// Tokenize a full source file.
///
/// Produces the parser-facing stream: within-line tokens plus explicit
/// `Newline`, `Indent`, `Dedent` and a final `Eof`. Blank and comment-only
/// lines produce no tokens at all.
pub fn lex(source: &str, file_id: u16) -> Result<Vec<Spanned>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut out: Vec<Spanned> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut bracket_depth: usize = 0;
    let mut line_start: usize = 0;
    let mut at_line_start = true;
    let mut line_has_tokens = false;

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(file_id, range.start as u32, range.end as u32);
        let token = match result {
            Ok(token) => token,
            Err(()) => {
                return Err(LexError::new(
                    format!("unexpected character(s) '{}'", lexer.slice()),
                    span,
                ));
            }
        };

        match token {
            Token::Newline => {
                if bracket_depth == 0 {
                    if line_has_tokens {
                        out.push(Spanned::new(Token::Newline, span));
                        line_has_tokens = false;
                    }
                    at_line_start = true;
                }
                line_start = range.end;
            }
            token => {
                if bracket_depth == 0 && at_line_start {
                    track_indent(source, file_id, line_start, range.start, &mut indents, &mut out)?;
                    at_line_start = false;
                }
                match &token {
                    Token::LParen | Token::LBracket | Token::LBrace => bracket_depth += 1,
                    Token::RParen | Token::RBracket | Token::RBrace => {
                        bracket_depth = bracket_depth.saturating_sub(1);
                    }
                    _ => {}
                }
                line_has_tokens = true;
                if let Token::FString(raw) = token {
                    expand_fstring(&raw, span, range.start + 2, file_id, &mut out)?;
                } else {
                    out.push(Spanned::new(token, span));
                }
            }
        }
    }

    let end = source.len() as u32;
    let eof_span = Span::new(file_id, end, end);
    if line_has_tokens {
        out.push(Spanned::new(Token::Newline, eof_span));
    }
    while indents.len() > 1 {
        indents.pop();
        out.push(Spanned::new(Token::Dedent, eof_span));
    }
    out.push(Spanned::new(Token::Eof, eof_span));
    Ok(out)
}

/// Compare the indentation prefix of a fresh line against the stack.
fn track_indent(
    source: &str,
    file_id: u16,
    line_start: usize,
    token_start: usize,
    indents: &mut Vec<usize>,
    out: &mut Vec<Spanned>,
) -> Result<(), LexError> {
    let prefix = &source[line_start..token_start];
    let span = Span::new(file_id, line_start as u32, token_start as u32);

    let has_spaces = prefix.contains(' ');
    let has_tabs = prefix.contains('\t');
    if has_spaces && has_tabs {
        return Err(LexError::new(
            "indentation mixes tabs and spaces",
            span,
        ));
    }

    let width = prefix.chars().filter(|c| *c == ' ' || *c == '\t').count();
    let current = *indents.last().expect("indent stack is never empty");

    if width > current {
        indents.push(width);
        out.push(Spanned::new(Token::Indent, span));
    } else if width < current {
        while *indents.last().expect("indent stack is never empty") > width {
            indents.pop();
            out.push(Spanned::new(Token::Dedent, span));
        }
        if *indents.last().expect("indent stack is never empty") != width {
            return Err(LexError::new(
                "dedent does not match any outer indentation level",
                span,
            ));
        }
    }
    Ok(())
}

/// Split an f-string body into literal fragments and embedded expressions.
///
/// `content_offset` is the byte offset of the body within the source file,
/// used to give embedded expression tokens real spans.
fn expand_fstring(
    raw: &str,
    token_span: Span,
    content_offset: usize,
    file_id: u16,
    out: &mut Vec<Spanned>,
) -> Result<(), LexError> {
    out.push(Spanned::new(Token::FStringStart, token_span));

    let bytes = raw.as_bytes();
    let mut literal = String::new();
    let mut literal_start = 0usize;
    let mut i = 0usize;

    let flush = |literal: &mut String,
                 start: usize,
                 end: usize,
                 out: &mut Vec<Spanned>|
     -> Result<(), LexError> {
        if literal.is_empty() {
            return Ok(());
        }
        let span = Span::new(
            file_id,
            (content_offset + start) as u32,
            (content_offset + end) as u32,
        );
        let unescaped = crate::unescape(literal)
            .ok_or_else(|| LexError::new("invalid escape in f-string", span))?;
        out.push(Spanned::new(Token::FStringLit(unescaped), span));
        literal.clear();
        Ok(())
    };

    while i < bytes.len() {
        match bytes[i] {
            b'{' if i + 1 < bytes.len() && bytes[i + 1] == b'{' => {
                literal.push('{');
                i += 2;
            }
            b'}' if i + 1 < bytes.len() && bytes[i + 1] == b'}' => {
                literal.push('}');
                i += 2;
            }
            b'{' => {
                flush(&mut literal, literal_start, i, out)?;
                let open_span = Span::new(
                    file_id,
                    (content_offset + i) as u32,
                    (content_offset + i + 1) as u32,
                );
                let mut depth = 1usize;
                let expr_start = i + 1;
                let mut j = expr_start;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                if depth > 0 {
                    return Err(LexError::new("unclosed '{' in f-string", open_span));
                }
                let expr_raw = &raw[expr_start..j];
                if expr_raw.trim().is_empty() {
                    return Err(LexError::new("empty expression in f-string", open_span));
                }
                out.push(Spanned::new(Token::FStringExprStart, open_span));
                lex_fragment(expr_raw, content_offset + expr_start, file_id, out)?;
                out.push(Spanned::new(
                    Token::FStringExprEnd,
                    Span::new(
                        file_id,
                        (content_offset + j) as u32,
                        (content_offset + j + 1) as u32,
                    ),
                ));
                i = j + 1;
                literal_start = i;
            }
            b'}' => {
                let span = Span::new(
                    file_id,
                    (content_offset + i) as u32,
                    (content_offset + i + 1) as u32,
                );
                return Err(LexError::new("single '}' in f-string", span));
            }
            _ => {
                // Advance over one full UTF-8 character.
                let ch_len = raw[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                literal.push_str(&raw[i..i + ch_len]);
                i += ch_len;
            }
        }
    }
    flush(&mut literal, literal_start, raw.len(), out)?;
    out.push(Spanned::new(Token::FStringEnd, token_span));
    Ok(())
}

/// Lex an embedded expression slice, offsetting spans into the parent file.
fn lex_fragment(
    fragment: &str,
    offset: usize,
    file_id: u16,
    out: &mut Vec<Spanned>,
) -> Result<(), LexError> {
    let mut lexer = Token::lexer(fragment);
    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(
            file_id,
            (offset + range.start) as u32,
            (offset + range.end) as u32,
        );
        match result {
            Ok(Token::Newline) => {}
            Ok(Token::FString(_)) => {
                return Err(LexError::new("f-string nested in f-string", span));
            }
            Ok(token) => out.push(Spanned::new(token, span)),
            Err(()) => {
                return Err(LexError::new(
                    format!("unexpected character(s) '{}'", lexer.slice()),
                    span,
                ));
            }
        }
    }
    Ok(())
}

//! Tokenizer for Eiko source (`.eiko` files).
//!
//! Within-line tokens are produced by a logos-derived [`Token`]; the
//! indentation grammar lives in a separate pass ([`lex`]) that tracks a
//! stack of indentation widths and synthesizes `Newline`/`Indent`/`Dedent`
//! tokens, joins lines inside open brackets, and expands f-strings into
//! their literal fragments and embedded expression token runs.

use eiko_foundation::Span;
use logos::Logos;

pub mod indent;

pub use indent::lex;

/// One Eiko token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    // === Keywords ===
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("as")]
    As,
    #[token("resource")]
    Resource,
    #[token("typedef")]
    Typedef,
    #[token("enum")]
    Enum,
    #[token("def")]
    Def,
    #[token("implement")]
    Implement,
    #[token("self")]
    SelfKw,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    NoneKw,
    #[token("promise")]
    Promise,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    // === Literals ===
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    /// Plain or raw string literal. Raw strings keep escapes as-is.
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(strip_quotes(lex.slice())))]
    #[regex(r"'([^'\\\n]|\\.)*'", |lex| unescape(strip_quotes(lex.slice())))]
    #[regex(r#"r"[^"\n]*""#, |lex| Some(strip_quotes(&lex.slice()[1..]).to_string()))]
    #[regex(r"r'[^'\n]*'", |lex| Some(strip_quotes(&lex.slice()[1..]).to_string()))]
    Str(String),

    /// Raw body of an f-string; replaced by `FStringStart` .. `FStringEnd`
    /// runs before the parser ever sees it.
    #[regex(r#"f"([^"\\\n]|\\.)*""#, |lex| Some(strip_quotes(&lex.slice()[1..]).to_string()))]
    #[regex(r"f'([^'\\\n]|\\.)*'", |lex| Some(strip_quotes(&lex.slice()[1..]).to_string()))]
    FString(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // === Operators ===
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("**")]
    DoubleStar,
    #[token("*")]
    Star,
    #[token("//")]
    DoubleSlash,
    #[token("/")]
    Slash,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token("<")]
    Lt,
    #[token(">=")]
    GtEq,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("::")]
    DoubleColon,
    #[token(":")]
    Colon,
    #[token("...")]
    Ellipsis,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("@")]
    At,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // === Structural (synthesized by the indent tracker) ===
    #[token("\n")]
    Newline,
    Indent,
    Dedent,
    Eof,

    // === F-string structure (synthesized) ===
    FStringStart,
    FStringLit(String),
    FStringExprStart,
    FStringExprEnd,
    FStringEnd,
}

impl Token {
    /// Short human-readable form for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(n) => format!("integer `{n}`"),
            Token::Float(f) => format!("float `{f}`"),
            Token::Str(_) => "string literal".to_string(),
            Token::FString(_) | Token::FStringStart => "f-string".to_string(),
            Token::Ident(name) => format!("`{name}`"),
            Token::Newline => "end of line".to_string(),
            Token::Indent => "indent".to_string(),
            Token::Dedent => "dedent".to_string(),
            Token::Eof => "end of file".to_string(),
            Token::FStringLit(_) => "f-string fragment".to_string(),
            Token::FStringExprStart => "`{`".to_string(),
            Token::FStringExprEnd => "`}`".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Import => "import",
            Token::From => "from",
            Token::As => "as",
            Token::Resource => "resource",
            Token::Typedef => "typedef",
            Token::Enum => "enum",
            Token::Def => "def",
            Token::Implement => "implement",
            Token::SelfKw => "self",
            Token::If => "if",
            Token::Elif => "elif",
            Token::Else => "else",
            Token::For => "for",
            Token::In => "in",
            Token::True => "True",
            Token::False => "False",
            Token::NoneKw => "None",
            Token::Promise => "promise",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::DoubleStar => "**",
            Token::Star => "*",
            Token::DoubleSlash => "//",
            Token::Slash => "/",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::LtEq => "<=",
            Token::Lt => "<",
            Token::GtEq => ">=",
            Token::Gt => ">",
            Token::Assign => "=",
            Token::DoubleColon => "::",
            Token::Colon => ":",
            Token::Ellipsis => "...",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::At => "@",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Newline => "\\n",
            _ => "?",
        }
    }
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

impl Spanned {
    pub fn new(token: Token, span: Span) -> Self {
        Self { token, span }
    }
}

/// Error during tokenization.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

fn strip_quotes(slice: &str) -> &str {
    &slice[1..slice.len() - 1]
}

/// Process escape sequences in a plain string literal.
fn unescape(content: &str) -> Option<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('0') => result.push('\0'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                // Unknown escapes are kept verbatim, as the original
                // unicode_escape decoding did for unrecognized pairs.
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

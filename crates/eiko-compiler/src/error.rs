//! Compile-time errors.
//!
//! Every variant that can point at user source carries a [`Span`]; the CLI
//! renders them through the [`eiko_foundation::SourceMap`].

use eiko_foundation::Span;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("{message}")]
    Lex { message: String, span: Span },

    #[error("{message}")]
    Syntax { message: String, span: Span },

    #[error("module '{module}' could not be found")]
    ImportNotFound { module: String, span: Span },

    #[error("cyclic import of '{module}'")]
    ImportCyclic { module: String, span: Span },

    #[error("package '{package}' requires eikobot {required}, but this is {actual}")]
    ImportVersionMismatch {
        package: String,
        required: String,
        actual: String,
    },

    #[error("name '{name}' is not defined")]
    Name { name: String, span: Span },

    #[error("variable '{name}' accessed before it was assigned a value")]
    UnsetRead { name: String, span: Span },

    #[error("expected '{expected}', but got '{found}'")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },

    #[error("cannot coerce '{from}' to '{to}'")]
    NotCoercible {
        from: String,
        to: String,
        span: Span,
    },

    #[error("{message}")]
    Ambiguous { message: String, span: Span },

    #[error("illegal operation: tried to reassign '{name}'")]
    Reassign { name: String, span: Span },

    #[error("{message}")]
    Operation { message: String, span: Span },

    #[error("{message}")]
    Constructor { message: String, span: Span },

    #[error("a resource '{def_name}' with index '{index}' already exists")]
    DuplicateIndex {
        def_name: String,
        index: String,
        span: Span,
    },

    #[error("resource '{def_name}' has no usable index: {message}")]
    Unindexable {
        def_name: String,
        message: String,
        span: Span,
    },

    #[error("value '{value}' did not meet the condition of typedef '{type_name}'")]
    Refinement {
        type_name: String,
        value: String,
        span: Span,
    },

    #[error("plugin '{plugin}' raised: {message}")]
    PluginUser {
        plugin: String,
        message: String,
        span: Span,
    },

    #[error("plugin '{plugin}' failed internally: {message}")]
    PluginInternal {
        plugin: String,
        message: String,
        /// Host backtrace, shown only with `--enable-plugin-stacktrace`.
        trace: Option<String>,
        span: Span,
    },

    #[error("internal error: {message} (this is a bug, please report it)")]
    Internal { message: String },
}

impl Error {
    /// The span of the first frame pointing at user source, if any.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Lex { span, .. }
            | Error::Syntax { span, .. }
            | Error::ImportNotFound { span, .. }
            | Error::ImportCyclic { span, .. }
            | Error::Name { span, .. }
            | Error::UnsetRead { span, .. }
            | Error::TypeMismatch { span, .. }
            | Error::NotCoercible { span, .. }
            | Error::Ambiguous { span, .. }
            | Error::Reassign { span, .. }
            | Error::Operation { span, .. }
            | Error::Constructor { span, .. }
            | Error::DuplicateIndex { span, .. }
            | Error::Unindexable { span, .. }
            | Error::Refinement { span, .. }
            | Error::PluginUser { span, .. }
            | Error::PluginInternal { span, .. } => Some(*span),
            Error::ImportVersionMismatch { .. } | Error::Internal { .. } => None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}

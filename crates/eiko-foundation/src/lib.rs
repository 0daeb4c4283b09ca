//! Source tracking for the Eiko language.
//!
//! Every diagnostic produced by the compiler or deployer is anchored to a
//! [`Span`], which references a file registered in a [`SourceMap`]. The map
//! owns the source text and a line index so errors can be rendered as
//! `path:line:col` with the offending line.

pub mod span;

pub use span::{Span, SourceFile, SourceMap};

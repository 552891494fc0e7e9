//! Query language — AST, tokenizer, parser and canonical formatting.

pub mod ast;
pub mod format;
pub mod lexer;
pub mod parser;

pub use ast::{
    CompareOp, FieldRef, Pattern, Predicate, Query, RollingFunction, SortOrder, Transform,
};
pub use format::format_query;
pub use parser::QueryParser;

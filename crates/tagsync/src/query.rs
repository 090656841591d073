//! Search query compilation.
//!
//! - Operator tree (NOT / AND / OR over tag, attribute and id-range predicates)
//! - Tokenizer and recursive-descent compiler
//! - Canonical text and JSON transport forms

mod expression;
mod parser;

pub use expression::{CompiledQuery, Operator};
pub use parser::{compile, TagResolver};

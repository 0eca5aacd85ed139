//! Token-based SQL rewriting.
//!
//! The SQL text is never reparsed. A [`TokenGenerator`] turns the segments
//! of a bound statement into position-anchored [`SqlToken`]s, and the
//! [`RewriteEngine`] renders the statement once per route unit by copying
//! the text between tokens verbatim and substituting each token's
//! unit-specific rendering.

pub mod engine;
pub mod generator;
pub mod token;

pub use engine::{ExecutionUnit, RewriteContext, RewriteEngine};
pub use generator::TokenGenerator;
pub use token::{InListItem, SqlToken, TokenSet};

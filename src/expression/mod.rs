/// Expression engine
///
/// Sandboxed interpreter for conditions and variable expressions: literals,
/// field access, comparisons, arithmetic and boolean operators.

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::{render, truthy, Evaluator};
pub use lexer::{Lexer, Token};
pub use parser::{BinaryOp, Expr, ExprParser, UnaryOp};

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while lexing, parsing or evaluating an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("lex error at position {position}: {message}")]
    Lex { position: usize, message: String },

    #[error("parse error at token {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// Evaluate `input` against `bindings`
pub fn evaluate(input: &str, bindings: &Map<String, Value>) -> Result<Value, ExpressionError> {
    Evaluator::new(bindings).eval_str(input)
}

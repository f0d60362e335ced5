// Restricted boolean expression dialect over the action context.
// Compiled once at policy load; evaluation never allocates a parser.

mod ast;
mod eval;
mod lexer;
mod parser;

pub use ast::{Expr, Type};
pub use eval::Value;

use warden_types::ActionContext;

use crate::Result;

/// A compiled policy condition.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    ast: Expr,
}

impl CompiledExpr {
    /// Parse, resolve variables and type-check. Fails at load time with a
    /// `Compile` error; a compiled expression cannot fail to be boolean.
    pub fn compile(source: &str) -> Result<Self> {
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against one action context.
    pub fn matches(&self, ctx: &ActionContext) -> Result<bool> {
        match eval::eval(&self.ast, ctx)? {
            Value::Bool(b) => Ok(b),
            Value::Json(serde_json::Value::Bool(b)) => Ok(b),
            other => Err(crate::Error::Eval(format!(
                "expression '{}' produced a non-bool: {:?}",
                self.source, other
            ))),
        }
    }
}

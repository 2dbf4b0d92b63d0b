//! The filter expression DSL: pest grammar → AST → evaluator.

pub mod ast;
pub mod eval;
pub mod parser;

pub use ast::Expr;
pub use eval::{eval, EvalContext, EvalError};
pub use parser::{parse, ParseError};

/// A parsed, ready-to-evaluate expression. Parsing happens once, at
/// ingester construction time, so per-event evaluation is O(1) in the size
/// of the expression text and O(k) in the number of comparisons it
/// contains (spec §4.2) — there is no re-parsing per event.
#[derive(Debug, Clone)]
pub struct CompiledExpr(Expr);

impl CompiledExpr {
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        Ok(Self(parse(source)?))
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<(bool, String), EvalError> {
        eval(&self.0, ctx)
    }
}

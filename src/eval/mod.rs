pub mod capability;
pub mod condition;
pub mod context;
pub mod evaluator;
pub mod expression;
pub mod statement;

pub use capability::Capability;
pub use evaluator::{EvalError, EvalResult, ScriptEvaluator};

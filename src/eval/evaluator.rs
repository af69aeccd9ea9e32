use std::sync::Arc;

use thiserror::Error;

use super::context::ScriptContext;
use super::statement::StatementEvaluator;
use crate::ast::ScriptDef;
use crate::eval::capability::Capability;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("unknown capability method: {0}")]
    UnknownCapability(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("wrong number of arguments for {method}: expected {expected}, got {actual}")]
    Arity {
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("eval error: {0}")]
    Eval(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Runs one compiled script against a capability object. Top-level
/// statements always run first; their bindings stay in scope for `invoke`.
#[derive(Default)]
pub struct ScriptEvaluator {
    statement_evaluator: StatementEvaluator,
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn eval_script(
        &self,
        def: &ScriptDef,
        capability: Arc<dyn Capability>,
    ) -> EvalResult<()> {
        let context = Arc::new(ScriptContext::new(capability));

        self.statement_evaluator
            .eval_block(&def.statements, context.clone())
            .await?;

        if let Some(invoke) = &def.invoke {
            context.bind_capability(&invoke.param).await;
            context.push_scope().await;
            let result = self
                .statement_evaluator
                .eval_block(&invoke.body, context.clone())
                .await;
            context.pop_scope().await;
            result?;
        }

        Ok(())
    }
}

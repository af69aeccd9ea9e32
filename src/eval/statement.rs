use std::sync::Arc;

use async_recursion::async_recursion;

use super::context::ScriptContext;
use super::expression::ExpressionEvaluator;
use crate::ast::{Expression, Statement};
use crate::eval::evaluator::{EvalError, EvalResult};
use crate::state::Value;

/// 文の評価結果を表す型
#[derive(Debug, Clone)]
pub enum StatementResult {
    /// 値を返す文
    Value(Value),

    /// 制御フロー
    Control(ControlFlow),
}

#[derive(Debug, Clone)]
pub enum ControlFlow {
    Return(Value),
}

pub struct StatementEvaluator {
    pub expression_evaluator: Arc<ExpressionEvaluator>,
}

impl Default for StatementEvaluator {
    fn default() -> Self {
        Self {
            expression_evaluator: Arc::new(ExpressionEvaluator::new()),
        }
    }
}

impl StatementEvaluator {
    pub fn new(expression_evaluator: Arc<ExpressionEvaluator>) -> Self {
        Self {
            expression_evaluator,
        }
    }

    #[async_recursion]
    pub async fn eval_statement(
        &self,
        statement: &Statement,
        context: Arc<ScriptContext>,
    ) -> EvalResult<StatementResult> {
        match statement {
            Statement::Expression(expr) => Ok(StatementResult::Value(
                self.eval_expression(expr, context).await?,
            )),
            Statement::Let { name, value } => {
                let value = self.eval_expression(value, context.clone()).await?;
                context.declare(name, value).await;
                Ok(StatementResult::Value(Value::Null))
            }
            Statement::Assignment { target, value } => {
                let value = self.eval_expression(value, context.clone()).await?;
                context.assign(target, value).await;
                Ok(StatementResult::Value(Value::Null))
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => {
                self.eval_if(condition, then_block, else_block, context)
                    .await
            }
            Statement::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expression(expr, context).await?,
                    None => Value::Null,
                };
                Ok(StatementResult::Control(ControlFlow::Return(value)))
            }
        }
    }

    pub async fn eval_expression(
        &self,
        expr: &Expression,
        context: Arc<ScriptContext>,
    ) -> EvalResult<Value> {
        self.expression_evaluator
            .eval_expression(expr, context)
            .await
    }

    async fn eval_if(
        &self,
        condition: &Expression,
        then_block: &[Statement],
        else_block: &Option<Vec<Statement>>,
        context: Arc<ScriptContext>,
    ) -> EvalResult<StatementResult> {
        let condition_value = self.eval_expression(condition, context.clone()).await?;

        match condition_value {
            Value::Boolean(true) => self.eval_scoped_block(then_block, context).await,
            Value::Boolean(false) => {
                if let Some(else_block) = else_block {
                    self.eval_scoped_block(else_block, context).await
                } else {
                    Ok(StatementResult::Value(Value::Null))
                }
            }
            _ => Err(EvalError::TypeMismatch(format!(
                "if condition must be a boolean, got {:?}",
                condition_value
            ))),
        }
    }

    async fn eval_scoped_block(
        &self,
        statements: &[Statement],
        context: Arc<ScriptContext>,
    ) -> EvalResult<StatementResult> {
        context.push_scope().await;
        let result = self.eval_block(statements, context.clone()).await;
        context.pop_scope().await;
        result
    }

    pub async fn eval_block(
        &self,
        statements: &[Statement],
        context: Arc<ScriptContext>,
    ) -> EvalResult<StatementResult> {
        let mut last = Value::Null;
        for stmt in statements.iter() {
            let result = self.eval_statement(stmt, context.clone()).await?;
            match result {
                StatementResult::Value(value) => {
                    last = value;
                }
                StatementResult::Control(ControlFlow::Return(value)) => {
                    return Ok(StatementResult::Control(ControlFlow::Return(value)))
                }
            }
        }
        Ok(StatementResult::Value(last))
    }
}

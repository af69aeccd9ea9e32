//! Typed expression evaluation for sandboxed scripts. Arithmetic and
//! comparison here use `Value` semantics (numeric promotion, string concat
//! on `+`); the string-coercion rules of declarative conditions do not
//! apply.

use std::sync::Arc;

use async_recursion::async_recursion;

use crate::ast::{BinaryOperator, Expression, Literal, UnaryOperator};
use crate::eval::context::ScriptContext;
use crate::eval::evaluator::{EvalError, EvalResult};
use crate::state::Value;

#[derive(Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    #[async_recursion]
    pub async fn eval_expression(
        &self,
        expr: &Expression,
        context: Arc<ScriptContext>,
    ) -> EvalResult<Value> {
        match expr {
            Expression::Literal(lit) => Ok(Self::eval_literal(lit)),
            Expression::Variable(name) => self.eval_variable(name, context).await,
            Expression::UnaryOp { op, operand } => {
                let value = self.eval_expression(operand, context).await?;
                self.eval_unary_op(*op, &value)
            }
            Expression::BinaryOp { op, left, right } => {
                let left = self.eval_expression(left, context.clone()).await?;
                let right = self.eval_expression(right, context).await?;
                self.eval_binary_op(*op, &left, &right)
            }
            Expression::CapabilityCall {
                object,
                method,
                args,
            } => self.eval_capability_call(object, method, args, context).await,
        }
    }

    fn eval_literal(lit: &Literal) -> Value {
        match lit {
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Null => Value::Null,
        }
    }

    async fn eval_variable(&self, name: &str, context: Arc<ScriptContext>) -> EvalResult<Value> {
        if context.capability_binding().await.as_deref() == Some(name) {
            return Err(EvalError::Eval(format!(
                "capability object {} cannot be used as a value",
                name
            )));
        }
        context.get(name).await
    }

    fn eval_unary_op(&self, op: UnaryOperator, value: &Value) -> EvalResult<Value> {
        match (op, value) {
            (UnaryOperator::Minus, Value::Number(n)) => Ok(Value::Number(-n)),
            (UnaryOperator::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
            _ => Err(EvalError::TypeMismatch(format!("{:?} {:?}", op, value))),
        }
    }

    fn eval_binary_op(&self, op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
        match op {
            BinaryOperator::Add => self.eval_add(left, right),
            BinaryOperator::Subtract => self.eval_numeric_op(left, right, "-", |l, r| Ok(l - r)),
            BinaryOperator::Multiply => self.eval_numeric_op(left, right, "*", |l, r| Ok(l * r)),
            BinaryOperator::Divide => self.eval_numeric_op(left, right, "/", |l, r| {
                if r == 0.0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(l / r)
                }
            }),
            BinaryOperator::Modulo => self.eval_numeric_op(left, right, "%", |l, r| {
                if r == 0.0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(l % r)
                }
            }),
            BinaryOperator::Equal => Ok(Value::Boolean(left == right)),
            BinaryOperator::NotEqual => Ok(Value::Boolean(left != right)),
            BinaryOperator::LessThan => self.compare_values(left, right, |o| o.is_lt()),
            BinaryOperator::GreaterThan => self.compare_values(left, right, |o| o.is_gt()),
            BinaryOperator::LessThanEqual => self.compare_values(left, right, |o| o.is_le()),
            BinaryOperator::GreaterThanEqual => self.compare_values(left, right, |o| o.is_ge()),
            BinaryOperator::And => match (left, right) {
                (Value::Boolean(l), Value::Boolean(r)) => Ok(Value::Boolean(*l && *r)),
                _ => Err(EvalError::TypeMismatch(format!("{:?} && {:?}", left, right))),
            },
            BinaryOperator::Or => match (left, right) {
                (Value::Boolean(l), Value::Boolean(r)) => Ok(Value::Boolean(*l || *r)),
                _ => Err(EvalError::TypeMismatch(format!("{:?} || {:?}", left, right))),
            },
        }
    }

    // `+` doubles as string concatenation
    fn eval_add(&self, left: &Value, right: &Value) -> EvalResult<Value> {
        match (left, right) {
            (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
            (Value::String(l), Value::String(r)) => Ok(Value::String(l.clone() + r)),
            _ => Err(EvalError::TypeMismatch(format!("{:?} + {:?}", left, right))),
        }
    }

    fn eval_numeric_op<F>(
        &self,
        left: &Value,
        right: &Value,
        symbol: &str,
        op: F,
    ) -> EvalResult<Value>
    where
        F: Fn(f64, f64) -> EvalResult<f64>,
    {
        match (left, right) {
            (Value::Number(l), Value::Number(r)) => Ok(Value::Number(op(*l, *r)?)),
            _ => Err(EvalError::TypeMismatch(format!(
                "{:?} {} {:?}",
                left, symbol, right
            ))),
        }
    }

    fn compare_values<F>(&self, left: &Value, right: &Value, compare: F) -> EvalResult<Value>
    where
        F: Fn(std::cmp::Ordering) -> bool,
    {
        match (left, right) {
            (Value::Number(l), Value::Number(r)) => l
                .partial_cmp(r)
                .map(|ordering| Value::Boolean(compare(ordering)))
                .ok_or_else(|| EvalError::Eval(format!("{:?} <=> {:?}", left, right))),
            (Value::String(l), Value::String(r)) => Ok(Value::Boolean(compare(l.cmp(r)))),
            _ => Err(EvalError::TypeMismatch(format!(
                "{:?} <=> {:?}",
                left, right
            ))),
        }
    }

    async fn eval_capability_call(
        &self,
        object: &str,
        method: &str,
        args: &[Expression],
        context: Arc<ScriptContext>,
    ) -> EvalResult<Value> {
        if context.capability_binding().await.as_deref() != Some(object) {
            return Err(EvalError::UndefinedVariable(object.to_string()));
        }

        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.eval_expression(arg, context.clone()).await?);
        }

        let capability = context.capability();
        match method {
            "getValue" => {
                let [field] = Self::arity::<1>(method, &evaluated)?;
                Ok(capability.get_value(&field.coerce_string()).await)
            }
            "setValue" => {
                let [field, value] = Self::arity::<2>(method, &evaluated)?;
                capability
                    .set_value(&field.coerce_string(), value.clone())
                    .await;
                Ok(Value::Null)
            }
            "setMandatory" => {
                let [field, flag] = Self::arity::<2>(method, &evaluated)?;
                capability
                    .set_mandatory(&field.coerce_string(), Self::as_bool(method, flag)?)
                    .await;
                Ok(Value::Null)
            }
            "setReadOnly" => {
                let [field, flag] = Self::arity::<2>(method, &evaluated)?;
                capability
                    .set_read_only(&field.coerce_string(), Self::as_bool(method, flag)?)
                    .await;
                Ok(Value::Null)
            }
            "setDisplay" => {
                let [field, flag] = Self::arity::<2>(method, &evaluated)?;
                capability
                    .set_display(&field.coerce_string(), Self::as_bool(method, flag)?)
                    .await;
                Ok(Value::Null)
            }
            "addError" => {
                let [field, message] = Self::arity::<2>(method, &evaluated)?;
                capability
                    .add_error(&field.coerce_string(), &message.coerce_string())
                    .await;
                Ok(Value::Null)
            }
            "clearError" => {
                let [field] = Self::arity::<1>(method, &evaluated)?;
                capability.clear_error(&field.coerce_string()).await;
                Ok(Value::Null)
            }
            _ => Err(EvalError::UnknownCapability(method.to_string())),
        }
    }

    fn arity<'a, const N: usize>(method: &str, args: &'a [Value]) -> EvalResult<&'a [Value; N]> {
        args.try_into().map_err(|_| EvalError::Arity {
            method: method.to_string(),
            expected: N,
            actual: args.len(),
        })
    }

    fn as_bool(method: &str, value: &Value) -> EvalResult<bool> {
        match value {
            Value::Boolean(b) => Ok(*b),
            _ => Err(EvalError::TypeMismatch(format!(
                "{} expects a boolean, got {:?}",
                method, value
            ))),
        }
    }
}

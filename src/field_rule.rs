//! Declarative field-rule evaluation: SetValue, ClearValue and Calculate.
//!
//! Rules execute in array order as received. A rule's condition expression
//! is carried in the metadata but always treated as satisfied at evaluation
//! time. Calculate substitutes whole-word field tokens into the value
//! expression, then evaluates it with the restricted arithmetic grammar; a
//! failed rule is logged and skipped without aborting the rest of the pass.

use regex::Regex;
use tracing::{debug, warn};

use crate::ast::{BinaryOperator, Expression, Literal, UnaryOperator};
use crate::eval::evaluator::{EvalError, EvalResult};
use crate::metadata::{FieldRule, FieldRuleActionType};
use crate::parser::{parse_arithmetic, ParseError};
use crate::state::{RecordData, Value};

#[derive(Default)]
pub struct FieldRuleEvaluator;

impl FieldRuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// `trigger_field_key = None` is a full sweep (load). Otherwise a rule
    /// is selected when its own trigger is null (always-run) or matches the
    /// changed field case-insensitively. Returns `Some(updated record)`
    /// only when at least one action executed.
    pub fn apply(
        &self,
        rules: &[FieldRule],
        record: &RecordData,
        trigger_field_key: Option<&str>,
    ) -> Option<RecordData> {
        let mut next = record.clone();
        let mut applied = false;

        for rule in rules
            .iter()
            .filter(|rule| Self::is_selected(rule, trigger_field_key))
        {
            match rule.action_type {
                FieldRuleActionType::SetValue => {
                    next.insert(
                        rule.target_field_key.clone(),
                        Value::String(rule.value_expression.clone()),
                    );
                    applied = true;
                }
                FieldRuleActionType::ClearValue => {
                    next.insert(rule.target_field_key.clone(), Value::Null);
                    applied = true;
                }
                FieldRuleActionType::Calculate => {
                    // later rules see the writes of earlier rules in the
                    // same pass
                    match self.calculate(&rule.value_expression, &next) {
                        Ok(value) => {
                            debug!(rule = %rule.id, target = %rule.target_field_key, %value, "calculated");
                            next.insert(rule.target_field_key.clone(), value);
                            applied = true;
                        }
                        Err(e) => {
                            warn!(rule = %rule.id, error = %e, "calculate failed, rule skipped");
                        }
                    }
                }
            }
        }

        if applied {
            Some(next)
        } else {
            None
        }
    }

    fn is_selected(rule: &FieldRule, trigger_field_key: Option<&str>) -> bool {
        match (trigger_field_key, rule.trigger_field_key.as_deref()) {
            (None, _) | (_, None) => true,
            (Some(changed), Some(trigger)) => changed.eq_ignore_ascii_case(trigger),
        }
    }

    /// Substitute every whole-word occurrence of each record key with its
    /// current value (null/empty substitute as 0), then parse and evaluate
    /// the restricted arithmetic expression. Keys substitute longest first
    /// so a value that textually contains another field's key produces the
    /// same text on every run.
    fn calculate(&self, expression: &str, record: &RecordData) -> Result<Value, CalcError> {
        let mut keys: Vec<&String> = record.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut text = expression.to_string();
        for key in keys {
            let value = &record[key];
            let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(key)))
                .map_err(|e| CalcError::Substitution(e.to_string()))?;
            let rendered = value.coerce_string();
            let rendered = if rendered.is_empty() { "0" } else { &rendered };
            text = pattern.replace_all(&text, rendered).into_owned();
        }

        let expr = parse_arithmetic(&text)?;
        Ok(Value::Number(eval_numeric(&expr)?))
    }
}

#[derive(thiserror::Error, Debug)]
enum CalcError {
    #[error("substitution failed: {0}")]
    Substitution(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Pure numeric reduction over the restricted grammar. The parser only
/// emits numbers, unary minus and `+ - * / %`, everything else is a
/// defect in the substitution step and reported as an eval error.
fn eval_numeric(expr: &Expression) -> EvalResult<f64> {
    match expr {
        Expression::Literal(Literal::Number(n)) => Ok(*n),
        Expression::UnaryOp {
            op: UnaryOperator::Minus,
            operand,
        } => Ok(-eval_numeric(operand)?),
        Expression::BinaryOp { op, left, right } => {
            let left = eval_numeric(left)?;
            let right = eval_numeric(right)?;
            match op {
                BinaryOperator::Add => Ok(left + right),
                BinaryOperator::Subtract => Ok(left - right),
                BinaryOperator::Multiply => Ok(left * right),
                BinaryOperator::Divide => {
                    if right == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(left / right)
                    }
                }
                BinaryOperator::Modulo => {
                    if right == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(left % right)
                    }
                }
                _ => Err(EvalError::Eval(format!(
                    "operator {:?} not allowed in calculations",
                    op
                ))),
            }
        }
        _ => Err(EvalError::Eval(format!(
            "expression not allowed in calculations: {:?}",
            expr
        ))),
    }
}

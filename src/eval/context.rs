//! Execution context for one script run: a scope stack for local bindings
//! plus the bound capability object. Name resolution reaches only these.
//! There is no ambient binding for documents, network primitives, the
//! filesystem or any other host surface, so none are reachable from a
//! script.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::eval::capability::Capability;
use crate::eval::evaluator::{EvalError, EvalResult};
use crate::state::Value;

#[derive(Debug, Default)]
struct Scope {
    variables: HashMap<String, Value>,
}

pub struct ScriptContext {
    scopes: RwLock<Vec<Scope>>,
    capability: Arc<dyn Capability>,
    capability_binding: RwLock<Option<String>>,
}

impl ScriptContext {
    pub fn new(capability: Arc<dyn Capability>) -> Self {
        Self {
            scopes: RwLock::new(vec![Scope::default()]),
            capability,
            capability_binding: RwLock::new(None),
        }
    }

    pub fn capability(&self) -> Arc<dyn Capability> {
        self.capability.clone()
    }

    /// Bind the capability object to the `invoke` parameter name.
    pub async fn bind_capability(&self, name: &str) {
        *self.capability_binding.write().await = Some(name.to_string());
    }

    pub async fn capability_binding(&self) -> Option<String> {
        self.capability_binding.read().await.clone()
    }

    pub async fn push_scope(&self) {
        self.scopes.write().await.push(Scope::default());
    }

    pub async fn pop_scope(&self) {
        let mut scopes = self.scopes.write().await;
        // the script-level scope always stays
        if scopes.len() > 1 {
            scopes.pop();
        }
    }

    /// `let` declares in the innermost scope, shadowing outer bindings.
    pub async fn declare(&self, name: &str, value: Value) {
        let mut scopes = self.scopes.write().await;
        scopes
            .last_mut()
            .expect("scope stack is never empty")
            .variables
            .insert(name.to_string(), value);
    }

    /// Assignment updates the innermost binding holding `name`; assigning
    /// to an undeclared name creates it at script level.
    pub async fn assign(&self, name: &str, value: Value) {
        let mut scopes = self.scopes.write().await;
        for scope in scopes.iter_mut().rev() {
            if let Some(slot) = scope.variables.get_mut(name) {
                *slot = value;
                return;
            }
        }
        scopes
            .first_mut()
            .expect("scope stack is never empty")
            .variables
            .insert(name.to_string(), value);
    }

    pub async fn get(&self, name: &str) -> EvalResult<Value> {
        let scopes = self.scopes.read().await;
        for scope in scopes.iter().rev() {
            if let Some(value) = scope.variables.get(name) {
                return Ok(value.clone());
            }
        }
        Err(EvalError::UndefinedVariable(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::capability::MockCapability;
    use pretty_assertions::assert_eq;

    fn context() -> ScriptContext {
        ScriptContext::new(Arc::new(MockCapability::new()))
    }

    #[tokio::test]
    async fn test_declare_and_get() {
        let context = context();
        context.declare("x", Value::Number(1.0)).await;
        assert_eq!(context.get("x").await.unwrap(), Value::Number(1.0));
        assert!(matches!(
            context.get("y").await,
            Err(EvalError::UndefinedVariable(_))
        ));
    }

    #[tokio::test]
    async fn test_inner_scope_shadows_and_unwinds() {
        let context = context();
        context.declare("x", Value::Number(1.0)).await;
        context.push_scope().await;
        context.declare("x", Value::Number(2.0)).await;
        assert_eq!(context.get("x").await.unwrap(), Value::Number(2.0));
        context.pop_scope().await;
        assert_eq!(context.get("x").await.unwrap(), Value::Number(1.0));
    }

    #[tokio::test]
    async fn test_assign_reaches_outer_scope() {
        let context = context();
        context.declare("x", Value::Number(1.0)).await;
        context.push_scope().await;
        context.assign("x", Value::Number(5.0)).await;
        context.pop_scope().await;
        assert_eq!(context.get("x").await.unwrap(), Value::Number(5.0));
    }

    #[tokio::test]
    async fn test_assign_undeclared_lands_at_script_level() {
        let context = context();
        context.push_scope().await;
        context.assign("fresh", Value::Boolean(true)).await;
        context.pop_scope().await;
        assert_eq!(context.get("fresh").await.unwrap(), Value::Boolean(true));
    }
}

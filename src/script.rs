//! Script sandbox: compiles client scripts once per session and runs the
//! matching units per lifecycle event against a capability object. Each
//! unit is isolated: a compile or runtime failure is logged and reported,
//! and never prevents sibling scripts in the same pass from running.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::ast::ScriptDef;
use crate::eval::{Capability, ScriptEvaluator};
use crate::metadata::{ClientScript, ScriptEvent};
use crate::parser::parse_script;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("script {id} failed to compile: {message}")]
    Compile { id: String, message: String },
    #[error("script {id} failed: {message}")]
    Run { id: String, message: String },
}

/// One compiled script. `def` is None when the body failed to parse; the
/// unit is kept so the failure stays attributable, but every pass skips it.
pub struct ScriptUnit {
    pub id: String,
    pub event_type: ScriptEvent,
    pub trigger_field_key: Option<String>,
    def: Option<ScriptDef>,
}

#[derive(Default)]
pub struct ScriptSandbox {
    evaluator: ScriptEvaluator,
}

impl ScriptSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile all scripts for a session. Per-script isolation starts
    /// here: a script that fails to parse is recorded as failed and never
    /// blocks its siblings or the load.
    pub fn compile(&self, scripts: &[ClientScript]) -> (Vec<ScriptUnit>, Vec<ScriptError>) {
        let mut units = Vec::with_capacity(scripts.len());
        let mut failures = Vec::new();

        for script in scripts {
            let def = match parse_script(&script.script_body) {
                Ok(def) => Some(def),
                Err(e) => {
                    warn!(script = %script.id, error = %e, "script failed to compile");
                    failures.push(ScriptError::Compile {
                        id: script.id.clone(),
                        message: e.to_string(),
                    });
                    None
                }
            };
            units.push(ScriptUnit {
                id: script.id.clone(),
                event_type: script.event_type,
                trigger_field_key: script.trigger_field_key.clone(),
                def,
            });
        }

        (units, failures)
    }

    /// Run every unit matching the event (and, for OnChange, the trigger
    /// field) in array order. Returns the per-script failures of the pass.
    pub async fn run_event(
        &self,
        units: &[ScriptUnit],
        event: ScriptEvent,
        trigger_field_key: Option<&str>,
        capability: Arc<dyn Capability>,
    ) -> Vec<ScriptError> {
        let mut failures = Vec::new();

        for unit in units
            .iter()
            .filter(|unit| Self::matches(unit, event, trigger_field_key))
        {
            let Some(def) = &unit.def else {
                continue;
            };
            debug!(script = %unit.id, event = %event, "running script");
            if let Err(e) = self.evaluator.eval_script(def, capability.clone()).await {
                warn!(script = %unit.id, error = %e, "script failed");
                failures.push(ScriptError::Run {
                    id: unit.id.clone(),
                    message: e.to_string(),
                });
            }
        }

        failures
    }

    fn matches(unit: &ScriptUnit, event: ScriptEvent, trigger_field_key: Option<&str>) -> bool {
        if unit.event_type != event {
            return false;
        }
        if event != ScriptEvent::OnChange {
            return true;
        }
        match (&unit.trigger_field_key, trigger_field_key) {
            // null trigger means "match any change"
            (None, _) => true,
            (Some(trigger), Some(changed)) => trigger.eq_ignore_ascii_case(changed),
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::capability::MockCapability;
    use crate::state::Value;
    use pretty_assertions::assert_eq;

    fn script(id: &str, event: ScriptEvent, trigger: Option<&str>, body: &str) -> ClientScript {
        ClientScript {
            id: id.to_string(),
            event_type: event,
            trigger_field_key: trigger.map(str::to_string),
            script_body: body.to_string(),
            execution_order: 0,
        }
    }

    #[tokio::test]
    async fn test_compile_records_failures_without_blocking_siblings() {
        let sandbox = ScriptSandbox::new();
        let scripts = vec![
            script("bad", ScriptEvent::OnLoad, None, "let = broken"),
            script(
                "good",
                ScriptEvent::OnLoad,
                None,
                "invoke(form) { form.setValue('x', '1') }",
            ),
        ];
        let (units, failures) = sandbox.compile(&scripts);
        assert_eq!(units.len(), 2);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], ScriptError::Compile { ref id, .. } if id == "bad"));

        let mut mock = MockCapability::new();
        mock.expect_set_value()
            .withf(|field, value| field == "x" && *value == Value::String("1".to_string()))
            .times(1)
            .return_const(());

        let run_failures = sandbox
            .run_event(&units, ScriptEvent::OnLoad, None, Arc::new(mock))
            .await;
        // the broken unit is skipped silently at run time
        assert!(run_failures.is_empty());
    }

    #[tokio::test]
    async fn test_failing_script_does_not_stop_later_scripts() {
        let sandbox = ScriptSandbox::new();
        let scripts = vec![
            script("boom", ScriptEvent::OnSubmit, None, "invoke(form) { missing + 1 }"),
            script(
                "after",
                ScriptEvent::OnSubmit,
                None,
                "invoke(form) { form.addError('state', 'checked') }",
            ),
        ];
        let (units, _) = sandbox.compile(&scripts);

        let mut mock = MockCapability::new();
        mock.expect_add_error()
            .withf(|field, message| field == "state" && message == "checked")
            .times(1)
            .return_const(());

        let failures = sandbox
            .run_event(&units, ScriptEvent::OnSubmit, None, Arc::new(mock))
            .await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], ScriptError::Run { ref id, .. } if id == "boom"));
    }

    #[tokio::test]
    async fn test_on_change_trigger_matching() {
        let sandbox = ScriptSandbox::new();
        let scripts = vec![
            script(
                "scoped",
                ScriptEvent::OnChange,
                Some("Priority"),
                "invoke(form) { form.setMandatory('notes', true) }",
            ),
            script(
                "any",
                ScriptEvent::OnChange,
                None,
                "invoke(form) { form.setReadOnly('state', true) }",
            ),
            script(
                "other",
                ScriptEvent::OnChange,
                Some("category"),
                "invoke(form) { form.setDisplay('state', false) }",
            ),
        ];
        let (units, _) = sandbox.compile(&scripts);

        let mut mock = MockCapability::new();
        mock.expect_set_mandatory().times(1).return_const(());
        mock.expect_set_read_only().times(1).return_const(());
        mock.expect_set_display().times(0);

        let failures = sandbox
            .run_event(&units, ScriptEvent::OnChange, Some("priority"), Arc::new(mock))
            .await;
        assert!(failures.is_empty());
    }
}

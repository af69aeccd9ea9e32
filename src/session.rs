//! The form session: a state machine owning the record and field-state
//! maps, driving evaluation passes over them.
//!
//! States are {Uninitialized, Loading, Ready, Evaluating, Completed}. The
//! Evaluating state doubles as the reentrancy guard: it is engaged before a
//! field-change pass and released after the whole pass (policies, scoped
//! field rules, OnChange scripts) completes. A `set_field_value` arriving
//! while the guard is held returns immediately without mutating anything,
//! which is what stops feedback cycles from scripts that write back to the
//! field that triggered them.
//!
//! The initial-load pass does not engage the guard, so OnLoad scripts
//! calling `setValue` commit their values; each such value queues a normal
//! guarded change pass that runs after the OnLoad scripts finish, before
//! the session settles to Ready.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::event_bus::{ErrorEvent, EventBus, FormEvent, FormEventKind};
use crate::eval::Capability;
use crate::field_rule::FieldRuleEvaluator;
use crate::metadata::{FormMetadata, ScriptEvent};
use crate::policy::PolicyEvaluator;
use crate::script::{ScriptError, ScriptSandbox, ScriptUnit};
use crate::source::{MetadataError, MetadataSource, RecordStore};
use crate::state::{FieldState, FieldStateMap, RecordData, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Evaluating,
    Completed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("operation {operation} not allowed in state {state}")]
    InvalidState {
        operation: String,
        state: SessionState,
    },

    #[error("record store failed: {0}")]
    Store(String),
}

/// Result of a submit attempt, with the record snapshot it operated on.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub allowed: bool,
    pub record: RecordData,
}

pub struct FormSession {
    id: String,
    table: String,
    form_context: String,
    fetch_timeout: Duration,
    source: Arc<dyn MetadataSource>,
    store: Option<Arc<dyn RecordStore>>,
    bus: Arc<EventBus>,
    state: RwLock<SessionState>,
    record: RwLock<RecordData>,
    field_states: RwLock<FieldStateMap>,
    metadata: RwLock<FormMetadata>,
    script_units: RwLock<Vec<ScriptUnit>>,
    /// Field keys written by OnLoad scripts, each owed a guarded change
    /// pass before the session settles to Ready.
    pending_changes: Mutex<VecDeque<String>>,
    policy_evaluator: PolicyEvaluator,
    field_rule_evaluator: FieldRuleEvaluator,
    sandbox: ScriptSandbox,
}

impl FormSession {
    pub fn new(
        id: String,
        table: String,
        form_context: String,
        fetch_timeout: Duration,
        source: Arc<dyn MetadataSource>,
        store: Option<Arc<dyn RecordStore>>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            id,
            table,
            form_context,
            fetch_timeout,
            source,
            store,
            bus,
            state: RwLock::new(SessionState::Uninitialized),
            record: RwLock::new(RecordData::new()),
            field_states: RwLock::new(FieldStateMap::new()),
            metadata: RwLock::new(FormMetadata::default()),
            script_units: RwLock::new(Vec::new()),
            pending_changes: Mutex::new(VecDeque::new()),
            policy_evaluator: PolicyEvaluator::new(),
            field_rule_evaluator: FieldRuleEvaluator::new(),
            sandbox: ScriptSandbox::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn record(&self) -> RecordData {
        self.record.read().await.clone()
    }

    pub async fn field_states(&self) -> FieldStateMap {
        self.field_states.read().await.clone()
    }

    /// Fetch metadata and bring the session to Ready. On fetch failure the
    /// session stays in Loading and no partial metadata is accepted.
    #[instrument(level = "debug", skip(self), fields(session = %self.id))]
    pub async fn load(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            if *state != SessionState::Uninitialized {
                return Err(SessionError::InvalidState {
                    operation: "load".to_string(),
                    state: *state,
                });
            }
            *state = SessionState::Loading;
        }
        self.publish(FormEventKind::SessionLoading);

        let metadata = tokio::time::timeout(
            self.fetch_timeout,
            self.source.fetch(&self.table, &self.form_context),
        )
        .await
        .map_err(|_| MetadataError::Timeout(self.fetch_timeout))??;

        {
            let mut states = self.field_states.write().await;
            states.clear();
            for field in &metadata.field_overrides {
                states.insert(
                    field.field_key.clone(),
                    FieldState {
                        is_hidden: field.is_hidden,
                        is_required: field.is_required,
                        is_read_only: field.is_read_only,
                        error: None,
                    },
                );
            }
        }

        let (units, failures) = self.sandbox.compile(&metadata.client_scripts);
        self.publish_script_errors(failures);
        *self.script_units.write().await = units;
        *self.metadata.write().await = metadata.clone();

        // initial pass: full rule sweep, then policies, then OnLoad scripts
        self.apply_field_rules(&metadata, None).await;
        self.apply_policies(&metadata).await;
        let failures = self
            .run_scripts(ScriptEvent::OnLoad, None)
            .await;
        self.publish_script_errors(failures);

        // values written by OnLoad scripts each get a normal guarded pass
        loop {
            let field = self.pending_changes.lock().await.pop_front();
            let Some(field) = field else { break };
            self.run_guarded_pass(&field, SessionState::Loading).await;
        }

        *self.state.write().await = SessionState::Ready;
        self.publish(FormEventKind::SessionReady);
        Ok(())
    }

    /// Guarded entry point for field writes, from the user and from script
    /// `setValue` alike.
    #[instrument(level = "debug", skip(self, value), fields(session = %self.id))]
    pub async fn set_field_value(self: &Arc<Self>, field: &str, value: Value) {
        {
            let mut state = self.state.write().await;
            match *state {
                SessionState::Evaluating => {
                    debug!(%field, "evaluation in progress, write suppressed");
                    return;
                }
                SessionState::Loading => {
                    self.record
                        .write()
                        .await
                        .insert(field.to_string(), value);
                    self.pending_changes
                        .lock()
                        .await
                        .push_back(field.to_string());
                    self.publish(FormEventKind::RecordChanged {
                        field: field.to_string(),
                    });
                    return;
                }
                SessionState::Uninitialized | SessionState::Completed => {
                    debug!(%field, state = %*state, "write ignored");
                    return;
                }
                SessionState::Ready => {
                    self.record
                        .write()
                        .await
                        .insert(field.to_string(), value);
                    *state = SessionState::Evaluating;
                }
            }
        }
        self.publish(FormEventKind::RecordChanged {
            field: field.to_string(),
        });
        self.run_change_pass_body(field).await;
        *self.state.write().await = SessionState::Ready;
        self.publish(FormEventKind::EvaluationCompleted {
            field: field.to_string(),
        });
    }

    /// Run OnSubmit scripts (guard not engaged), then block iff any field
    /// carries a non-empty error. An allowed submit is persisted when a
    /// store is configured, and the session settles in Completed.
    #[instrument(level = "debug", skip(self), fields(session = %self.id))]
    pub async fn submit(self: &Arc<Self>) -> Result<SubmitOutcome, SessionError> {
        {
            let state = self.state.read().await;
            if *state != SessionState::Ready {
                return Err(SessionError::InvalidState {
                    operation: "submit".to_string(),
                    state: *state,
                });
            }
        }

        let failures = self.run_scripts(ScriptEvent::OnSubmit, None).await;
        self.publish_script_errors(failures);

        let record = self.record.read().await.clone();
        let blocked = self
            .field_states
            .read()
            .await
            .values()
            .any(FieldState::has_error);

        if blocked {
            self.publish(FormEventKind::SubmitBlocked);
            return Ok(SubmitOutcome {
                allowed: false,
                record,
            });
        }

        if let Some(store) = &self.store {
            store
                .save(&self.table, &record)
                .await
                .map_err(|e| SessionError::Store(e.to_string()))?;
        }
        *self.state.write().await = SessionState::Completed;
        self.publish(FormEventKind::SubmitAllowed);
        Ok(SubmitOutcome {
            allowed: true,
            record,
        })
    }

    /// Re-fetch metadata and fully reinitialize; there is no partial or
    /// incremental reload.
    #[instrument(level = "debug", skip(self), fields(session = %self.id))]
    pub async fn reload(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            match *state {
                SessionState::Ready | SessionState::Completed => {}
                other => {
                    return Err(SessionError::InvalidState {
                        operation: "reload".to_string(),
                        state: other,
                    });
                }
            }
            *state = SessionState::Uninitialized;
        }
        self.record.write().await.clear();
        self.field_states.write().await.clear();
        self.script_units.write().await.clear();
        self.pending_changes.lock().await.clear();

        self.load().await?;
        self.publish(FormEventKind::SessionReloaded);
        Ok(())
    }

    /// Engage the guard, run a change pass for `field`, then restore
    /// `resume`. Used by the post-load drain; the Ready-state path inlines
    /// the engagement in `set_field_value` to make the check-and-set atomic.
    async fn run_guarded_pass(self: &Arc<Self>, field: &str, resume: SessionState) {
        *self.state.write().await = SessionState::Evaluating;
        self.run_change_pass_body(field).await;
        *self.state.write().await = resume;
        self.publish(FormEventKind::EvaluationCompleted {
            field: field.to_string(),
        });
    }

    /// The pass itself: policies, field rules scoped to the changed field,
    /// OnChange scripts. Caller has already engaged the guard.
    async fn run_change_pass_body(self: &Arc<Self>, field: &str) {
        self.publish(FormEventKind::EvaluationStarted {
            field: field.to_string(),
        });
        let metadata = self.metadata.read().await.clone();
        self.apply_policies(&metadata).await;
        self.apply_field_rules(&metadata, Some(field)).await;
        let failures = self.run_scripts(ScriptEvent::OnChange, Some(field)).await;
        self.publish_script_errors(failures);
    }

    async fn apply_policies(&self, metadata: &FormMetadata) {
        let record = self.record.read().await.clone();
        let states = self.field_states.read().await.clone();
        if let Some(next) = self
            .policy_evaluator
            .apply(&metadata.policies, &record, &states)
        {
            *self.field_states.write().await = next;
            self.publish(FormEventKind::FieldStateChanged);
        }
    }

    async fn apply_field_rules(&self, metadata: &FormMetadata, trigger: Option<&str>) {
        let record = self.record.read().await.clone();
        if let Some(next) = self
            .field_rule_evaluator
            .apply(&metadata.field_rules, &record, trigger)
        {
            let changed: Vec<String> = next
                .iter()
                .filter(|(key, value)| record.get(*key) != Some(value))
                .map(|(key, _)| key.clone())
                .collect();
            *self.record.write().await = next;
            for field in changed {
                self.publish(FormEventKind::RecordChanged { field });
            }
        }
    }

    async fn run_scripts(
        self: &Arc<Self>,
        event: ScriptEvent,
        trigger: Option<&str>,
    ) -> Vec<ScriptError> {
        let units = self.script_units.read().await;
        let capability = Arc::new(SessionCapability {
            session: self.clone(),
        });
        self.sandbox
            .run_event(&units, event, trigger, capability)
            .await
    }

    fn publish(&self, kind: FormEventKind) {
        self.bus.publish(FormEvent::new(&self.id, kind));
    }

    fn publish_script_errors(&self, failures: Vec<ScriptError>) {
        for failure in failures {
            warn!(session = %self.id, error = %failure, "script failure");
            self.bus.publish_error(ErrorEvent {
                session_id: self.id.clone(),
                error_type: "script".to_string(),
                message: failure.to_string(),
            });
        }
    }
}

/// The capability object handed to scripts. `setValue` routes through the
/// session's guarded entry point; the four field-state verbs and the error
/// verbs mutate FieldState directly and always take effect regardless of
/// evaluation context.
struct SessionCapability {
    session: Arc<FormSession>,
}

impl SessionCapability {
    async fn with_state<F>(&self, field: &str, mutate: F)
    where
        F: FnOnce(&mut FieldState),
    {
        {
            let mut states = self.session.field_states.write().await;
            mutate(states.entry(field.to_string()).or_default());
        }
        self.session.publish(FormEventKind::FieldStateChanged);
    }
}

#[async_trait]
impl Capability for SessionCapability {
    async fn get_value(&self, field: &str) -> Value {
        self.session
            .record
            .read()
            .await
            .get(field)
            .cloned()
            .unwrap_or_default()
    }

    async fn set_value(&self, field: &str, value: Value) {
        self.session.set_field_value(field, value).await;
    }

    async fn set_mandatory(&self, field: &str, mandatory: bool) {
        self.with_state(field, |state| state.is_required = mandatory)
            .await;
    }

    async fn set_read_only(&self, field: &str, read_only: bool) {
        self.with_state(field, |state| state.is_read_only = read_only)
            .await;
    }

    async fn set_display(&self, field: &str, visible: bool) {
        self.with_state(field, |state| state.is_hidden = !visible)
            .await;
    }

    async fn add_error(&self, field: &str, message: &str) {
        let message = message.to_string();
        self.with_state(field, move |state| state.error = Some(message))
            .await;
    }

    async fn clear_error(&self, field: &str) {
        self.with_state(field, |state| state.error = None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ClientScript, FieldOverride};
    use crate::source::StaticMetadataSource;
    use pretty_assertions::assert_eq;

    fn session_with(metadata: FormMetadata) -> Arc<FormSession> {
        let source = StaticMetadataSource::new();
        let table = metadata.table.clone();
        let context = metadata.form_context.clone();
        source.insert(metadata);
        Arc::new(FormSession::new(
            "test-session".to_string(),
            table,
            context,
            Duration::from_secs(1),
            Arc::new(source),
            None,
            Arc::new(EventBus::new(64)),
        ))
    }

    fn on_change_script(id: &str, trigger: &str, body: &str) -> ClientScript {
        ClientScript {
            id: id.to_string(),
            event_type: ScriptEvent::OnChange,
            trigger_field_key: Some(trigger.to_string()),
            script_body: body.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_load_seeds_field_states_from_overrides() {
        let session = session_with(FormMetadata {
            table: "incident".to_string(),
            form_context: "default".to_string(),
            field_overrides: vec![FieldOverride {
                field_key: "priority".to_string(),
                is_required: true,
                ..Default::default()
            }],
            ..Default::default()
        });

        session.load().await.unwrap();
        assert_eq!(session.state().await, SessionState::Ready);
        assert!(session.field_states().await["priority"].is_required);
    }

    #[tokio::test]
    async fn test_on_load_set_value_commits() {
        let session = session_with(FormMetadata {
            table: "incident".to_string(),
            form_context: "default".to_string(),
            client_scripts: vec![ClientScript {
                id: "init".to_string(),
                event_type: ScriptEvent::OnLoad,
                script_body: "invoke(form) { form.setValue('state', 'open') }".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });

        session.load().await.unwrap();
        assert_eq!(
            session.record().await["state"],
            Value::String("open".to_string())
        );
    }

    #[tokio::test]
    async fn test_guard_suppresses_on_change_set_value() {
        let session = session_with(FormMetadata {
            table: "incident".to_string(),
            form_context: "default".to_string(),
            client_scripts: vec![on_change_script(
                "echo",
                "state",
                "invoke(form) { form.setValue('state', 'overwritten') }",
            )],
            ..Default::default()
        });

        session.load().await.unwrap();
        session
            .set_field_value("state", Value::String("open".to_string()))
            .await;
        // the script's write-back was a silent no-op, the user value stands
        assert_eq!(
            session.record().await["state"],
            Value::String("open".to_string())
        );
        assert_eq!(session.state().await, SessionState::Ready);
    }

    #[tokio::test]
    async fn test_field_state_verbs_bypass_guard() {
        let session = session_with(FormMetadata {
            table: "incident".to_string(),
            form_context: "default".to_string(),
            client_scripts: vec![on_change_script(
                "mandatory",
                "state",
                "invoke(form) { form.setMandatory('notes', true) }",
            )],
            ..Default::default()
        });

        session.load().await.unwrap();
        session
            .set_field_value("state", Value::String("open".to_string()))
            .await;
        assert!(session.field_states().await["notes"].is_required);
    }

    #[tokio::test]
    async fn test_submit_blocked_by_field_error() {
        let session = session_with(FormMetadata {
            table: "incident".to_string(),
            form_context: "default".to_string(),
            client_scripts: vec![ClientScript {
                id: "validate".to_string(),
                event_type: ScriptEvent::OnSubmit,
                script_body: "invoke(form) { form.addError('state', 'state is required') }"
                    .to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });

        session.load().await.unwrap();
        let outcome = session.submit().await.unwrap();
        assert!(!outcome.allowed);
        assert_eq!(session.state().await, SessionState::Ready);
    }

    #[tokio::test]
    async fn test_submit_completes_without_errors() {
        let session = session_with(FormMetadata {
            table: "incident".to_string(),
            form_context: "default".to_string(),
            ..Default::default()
        });

        session.load().await.unwrap();
        session
            .set_field_value("state", Value::String("open".to_string()))
            .await;
        let outcome = session.submit().await.unwrap();
        assert!(outcome.allowed);
        assert_eq!(
            outcome.record["state"],
            Value::String("open".to_string())
        );
        assert_eq!(session.state().await, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_load_twice_is_an_invalid_state() {
        let session = session_with(FormMetadata {
            table: "incident".to_string(),
            form_context: "default".to_string(),
            ..Default::default()
        });
        session.load().await.unwrap();
        assert!(matches!(
            session.load().await,
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_session_loading() {
        let source = StaticMetadataSource::new();
        let session = Arc::new(FormSession::new(
            "test-session".to_string(),
            "missing".to_string(),
            "default".to_string(),
            Duration::from_secs(1),
            Arc::new(source),
            None,
            Arc::new(EventBus::new(64)),
        ));
        assert!(matches!(
            session.load().await,
            Err(SessionError::Metadata(_))
        ));
        assert_eq!(session.state().await, SessionState::Loading);
    }
}

//! Form metadata: the declarative rule payload fetched per table and form
//! context. Field overrides, policies, field rules and client scripts all
//! arrive as ordered lists; array order is the evaluation order and is
//! never re-sorted locally.

use serde::{Deserialize, Serialize};
use strum::Display;

/// The full metadata payload for one table/form-context pair.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormMetadata {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub form_context: String,
    #[serde(default)]
    pub field_overrides: Vec<FieldOverride>,
    #[serde(default)]
    pub policies: Vec<UiPolicy>,
    #[serde(default)]
    pub field_rules: Vec<FieldRule>,
    #[serde(default)]
    pub client_scripts: Vec<ClientScript>,
}

/// Layout contract that seeds the initial FieldState on load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOverride {
    pub field_key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub column_span: Option<u32>,
}

/// Comparison operators for policy conditions. An unrecognized operator
/// code survives deserialization as `Unknown` and evaluates to false,
/// rather than failing the whole metadata load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[default]
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum LogicalGroup {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    pub target_field_key: String,
    #[serde(default)]
    pub operator: ConditionOperator,
    #[serde(default)]
    pub comparison_value: Option<String>,
    #[serde(default)]
    pub logical_group: LogicalGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum PolicyActionType {
    Show,
    Hide,
    MakeMandatory,
    MakeOptional,
    MakeReadOnly,
    MakeEditable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAction {
    pub target_field_key: String,
    pub action_type: PolicyActionType,
}

/// A visibility/requirement policy: when all of its conditions combine to
/// true against the current record, every action applies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPolicy {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
    #[serde(default)]
    pub actions: Vec<PolicyAction>,
    #[serde(default)]
    pub execution_order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum FieldRuleActionType {
    SetValue,
    Calculate,
    ClearValue,
}

/// A declarative per-field rule. `condition_expression` is carried in the
/// payload but is always treated as satisfied at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub trigger_field_key: Option<String>,
    #[serde(default)]
    pub condition_expression: Option<String>,
    pub target_field_key: String,
    pub action_type: FieldRuleActionType,
    #[serde(default)]
    pub value_expression: String,
    #[serde(default)]
    pub execution_order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum ScriptEvent {
    #[default]
    OnLoad,
    OnChange,
    OnSubmit,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientScript {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub event_type: ScriptEvent,
    #[serde(default)]
    pub trigger_field_key: Option<String>,
    #[serde(default)]
    pub script_body: String,
    #[serde(default)]
    pub execution_order: i64,
}

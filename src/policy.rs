//! Visibility/requirement policy evaluation.
//!
//! Policies run in array order as received; actions apply only when the
//! policy's conditions match. There is deliberately no undo branch for a
//! non-matching policy: effects accumulate across passes and are never
//! auto-reverted. That is a documented platform semantic.

use tracing::debug;

use crate::eval::condition;
use crate::metadata::{PolicyActionType, UiPolicy};
use crate::state::{FieldStateMap, RecordData};

#[derive(Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Returns `Some(updated map)` when at least one action was applied,
    /// `None` otherwise so the caller can keep the previous map instance
    /// and skip redundant downstream notification.
    pub fn apply(
        &self,
        policies: &[UiPolicy],
        record: &RecordData,
        states: &FieldStateMap,
    ) -> Option<FieldStateMap> {
        let mut next = states.clone();
        let mut applied = false;

        for policy in policies {
            if !condition::match_conditions(&policy.conditions, record) {
                continue;
            }
            for action in &policy.actions {
                let state = next.entry(action.target_field_key.clone()).or_default();
                match action.action_type {
                    PolicyActionType::Show => state.is_hidden = false,
                    PolicyActionType::Hide => state.is_hidden = true,
                    PolicyActionType::MakeMandatory => state.is_required = true,
                    PolicyActionType::MakeOptional => state.is_required = false,
                    PolicyActionType::MakeReadOnly => state.is_read_only = true,
                    PolicyActionType::MakeEditable => state.is_read_only = false,
                }
                applied = true;
                debug!(
                    policy = %policy.name,
                    field = %action.target_field_key,
                    action = %action.action_type,
                    "policy action applied"
                );
            }
        }

        if applied {
            Some(next)
        } else {
            None
        }
    }
}

use async_trait::async_trait;

use crate::state::Value;

/// The complete API surface reachable from sandboxed tenant scripts:
/// exactly these 7 verbs, nothing else. Widening it widens the sandbox's
/// attack surface and needs equal scrutiny.
///
/// `set_value` routes through the session's guarded entry point and is a
/// silent no-op while an evaluation pass holds the reentrancy guard. The
/// field-state verbs bypass the guard and always take effect.
#[mockall::automock]
#[async_trait]
pub trait Capability: Send + Sync {
    async fn get_value(&self, field: &str) -> Value;
    async fn set_value(&self, field: &str, value: Value);
    async fn set_mandatory(&self, field: &str, mandatory: bool);
    async fn set_read_only(&self, field: &str, read_only: bool);
    /// `visible = false` hides the field.
    async fn set_display(&self, field: &str, visible: bool);
    async fn add_error(&self, field: &str, message: &str);
    async fn clear_error(&self, field: &str);
}

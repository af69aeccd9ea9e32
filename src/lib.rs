//! # kitei: Metadata-Driven Form Rule Engine
//!
//! kitei evaluates declarative form metadata (visibility policies, field
//! rules, and sandboxed client scripts) against a record, keeping per-field
//! UI state consistent as values change.
//!
//! ## Evaluation Pipeline
//!
//! ```text
//! Metadata → Session Load → [Field Rules → Policies → OnLoad Scripts] → Ready
//!                  Field Change → [Policies → Scoped Rules → OnChange Scripts]
//!                  Submit → [OnSubmit Scripts → Error Check] → Completed
//! ```
//!
//! ## Components
//!
//! - Metadata contract and rule types ([`metadata`])
//! - Condition evaluation and the left-fold combinator ([`eval::condition`])
//! - Visibility/requirement policies ([`policy`])
//! - Declarative field rules with restricted arithmetic ([`field_rule`])
//! - Script DSL: parser ([`parser`]), AST ([`ast`]), sandboxed evaluation
//!   behind a 7-verb capability surface ([`eval`], [`script`])
//! - The session state machine with its reentrancy guard ([`session`])
//! - Engine facade and session registry ([`engine`])
//! - Lifecycle event broadcasting ([`event_bus`])

pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod event_bus;
pub mod field_rule;
pub mod metadata;
pub mod parser;
pub mod policy;
pub mod script;
pub mod session;
pub mod source;
pub mod state;

// Re-exports
pub use config::EngineConfig;
pub use engine::FormEngine;
pub use error::{Error, Result};
pub use metadata::*;
pub use parser::{parse_arithmetic, parse_script};
pub use session::{FormSession, SessionState, SubmitOutcome};
pub use state::{FieldState, FieldStateMap, RecordData, Value};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        // テストの前に一度だけ実行したい処理
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}

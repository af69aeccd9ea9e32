//! Engine facade: owns the event bus and the session registry, opens and
//! closes sessions against a metadata source.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::event_bus::{ErrorReceiver, EventBus, EventReceiver};
use crate::session::{FormSession, SessionError};
use crate::source::{MetadataSource, RecordStore};

pub struct FormEngine {
    config: EngineConfig,
    source: Arc<dyn MetadataSource>,
    store: Option<Arc<dyn RecordStore>>,
    bus: Arc<EventBus>,
    sessions: DashMap<String, Arc<FormSession>>,
}

impl FormEngine {
    pub fn new(config: EngineConfig, source: Arc<dyn MetadataSource>) -> Self {
        let bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            config,
            source,
            store: None,
            bus,
            sessions: DashMap::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    /// Open a session: generate an id, load it to Ready, register it. A
    /// session that fails to load is not registered.
    #[instrument(level = "debug", skip(self))]
    pub async fn open_session(
        &self,
        table: &str,
        form_context: Option<&str>,
    ) -> Result<Arc<FormSession>, SessionError> {
        let id = Uuid::new_v4().to_string();
        let context = form_context.unwrap_or(&self.config.default_form_context);
        let session = Arc::new(FormSession::new(
            id.clone(),
            table.to_string(),
            context.to_string(),
            self.config.metadata_fetch_timeout,
            self.source.clone(),
            self.store.clone(),
            self.bus.clone(),
        ));

        session.load().await?;
        self.sessions.insert(id.clone(), session.clone());
        debug!(session = %id, %table, "session opened");
        Ok(session)
    }

    pub fn session(&self, id: &str) -> Option<Arc<FormSession>> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    pub fn close_session(&self, id: &str) -> Option<Arc<FormSession>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            debug!(session = %id, "session closed");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

//! Broadcast-based publish-subscribe bus for session lifecycle events.
//!
//! The bus keeps two channels: one for regular form events and one for
//! error events, so error monitoring never competes with the high-volume
//! evaluation notifications. Publishing is non-blocking and a bus with no
//! external subscribers is valid; an internal receiver keeps the channels
//! open.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// What happened inside a session. Field-scoped kinds carry the field key.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum FormEventKind {
    SessionLoading,
    SessionReady,
    SessionReloaded,
    EvaluationStarted { field: String },
    EvaluationCompleted { field: String },
    FieldStateChanged,
    RecordChanged { field: String },
    SubmitAllowed,
    SubmitBlocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormEvent {
    pub session_id: String,
    pub kind: FormEventKind,
    pub timestamp: DateTime<Utc>,
}

impl FormEvent {
    pub fn new(session_id: &str, kind: FormEventKind) -> Self {
        Self {
            session_id: session_id.to_string(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorEvent {
    pub session_id: String,
    pub error_type: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("event send failed: {message}")]
    SendFailed { message: String },

    #[error("event receive failed: {message}")]
    ReceiveFailed { message: String },

    #[error("event receiver lagged by {count} events")]
    Lagged { count: u64 },
}

pub type EventResult<T> = Result<T, EventError>;

pub struct EventBus {
    event_sender: broadcast::Sender<FormEvent>,
    error_sender: broadcast::Sender<ErrorEvent>,
    capacity: usize,
    /// Internal receiver to keep the broadcast channel active
    _internal_receiver: broadcast::Receiver<FormEvent>,
    /// Internal receiver to keep the error channel active
    _internal_error_receiver: broadcast::Receiver<ErrorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, event_receiver) = broadcast::channel(capacity);
        let (error_sender, error_receiver) = broadcast::channel(capacity);
        Self {
            event_sender,
            error_sender,
            capacity,
            _internal_receiver: event_receiver,
            _internal_error_receiver: error_receiver,
        }
    }

    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        let event_rx = self.event_sender.subscribe();
        let error_rx = self.error_sender.subscribe();
        (EventReceiver::new(event_rx), ErrorReceiver::new(error_rx))
    }

    /// Publish a lifecycle event. Sending never fails the evaluation pass:
    /// the internal receiver keeps the channel alive, and a full buffer only
    /// drops the oldest events for lagging subscribers.
    pub fn publish(&self, event: FormEvent) {
        debug!(session = %event.session_id, kind = %event.kind, "publishing event");
        let _ = self.event_sender.send(event);
    }

    pub fn publish_error(&self, error: ErrorEvent) {
        let _ = self.error_sender.send(error);
    }

    pub fn subscribers_size(&self) -> usize {
        self.event_sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

pub struct EventReceiver {
    pub receiver: broadcast::Receiver<FormEvent>,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<FormEvent>) -> Self {
        Self { receiver }
    }

    /// イベントを受信する。Laggedエラーが発生した場合はresubscribeを試みて、エラーを返す。
    pub async fn recv(&mut self) -> EventResult<FormEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}

pub struct ErrorReceiver {
    pub receiver: broadcast::Receiver<ErrorEvent>,
}

impl ErrorReceiver {
    fn new(receiver: broadcast::Receiver<ErrorEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> EventResult<ErrorEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| EventError::ReceiveFailed {
                message: e.to_string(),
            })
    }
}

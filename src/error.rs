//! Top-level error type aggregating the per-module taxonomies.

use thiserror::Error;

use crate::config::ConfigError;
use crate::eval::EvalError;
use crate::event_bus::EventError;
use crate::parser::ParseError;
use crate::script::ScriptError;
use crate::session::SessionError;
use crate::source::{MetadataError, StoreError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("eval error: {0}")]
    Eval(#[from] EvalError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("event error: {0}")]
    Event(#[from] EventError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineState;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is {actual}, expected {expected}")]
    InvalidState {
        actual: EngineState,
        expected: &'static str,
    },
    #[error("interpreter has been disposed")]
    Disposed,
    #[error("interpreter is in use by a running callback")]
    InterpreterBusy,
    #[error("execution queue is closed")]
    QueueClosed,
    #[error("drain_and_wait called from the execution queue worker")]
    DrainFromWorker,
    #[error("execution queue did not drain within {0:?}")]
    DrainTimeout(Duration),
    #[error("queued job {job} panicked: {message}")]
    JobPanicked { job: &'static str, message: String },
    #[error("interpreter fault: {0}")]
    Lua(#[from] mlua::Error),
    #[error("object #{index} is cached as {cached} but the live table is {live}")]
    ClassMismatch {
        index: i64,
        cached: String,
        live: String,
    },
    #[error("object #{index} is a {actual}, not a {requested}")]
    TypeMismatch {
        index: i64,
        requested: &'static str,
        actual: String,
    },
    #[error("no object with index {0}")]
    NotFound(i64),
    #[error("unknown class tag {0:?}")]
    UnknownClass(String),
    #[error("field {0:?} is not callable")]
    NotCallable(String),
    #[error("cartridge resources unavailable: {0:#}")]
    Resources(#[source] anyhow::Error),
    #[error("save-state serializer failed: {0:#}")]
    Serializer(#[source] anyhow::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for the tolerated race where the interpreter went away mid-access.
    pub fn is_disposed(&self) -> bool {
        matches!(self, EngineError::Disposed)
    }

    pub(crate) fn into_lua(self) -> mlua::Error {
        match self {
            EngineError::Lua(err) => err,
            other => mlua::Error::external(other),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

use crate::core::ExitReason;
use crate::runtime::{CallError, SendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An event manager request failed.
#[derive(Debug, Error)]
pub enum EventError {
    /// A handler with this id is already installed.
    #[error("handler {0:?} already exists")]
    AlreadyExists(String),

    /// No handler with this id is installed.
    #[error("no handler {0:?}")]
    NotFound(String),

    /// The handler's `init` failed, so it was not installed.
    #[error("handler {0:?} failed to init: {1}")]
    InitFailed(String, ExitReason),

    /// The handler panicked while answering and was removed.
    #[error("handler {0:?} crashed: {1}")]
    Crashed(String, ExitReason),

    /// The manager could not be reached or did not answer.
    #[error(transparent)]
    Call(#[from] CallError),

    /// The event could not be sent.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// The manager-side failures, as they travel back in a reply.
#[derive(Debug, Serialize, Deserialize)]
pub(super) enum Refusal {
    AlreadyExists(String),
    NotFound(String),
    InitFailed(String, ExitReason),
    Crashed(String, ExitReason),
}

impl From<Refusal> for EventError {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::AlreadyExists(id) => EventError::AlreadyExists(id),
            Refusal::NotFound(id) => EventError::NotFound(id),
            Refusal::InitFailed(id, reason) => EventError::InitFailed(id, reason),
            Refusal::Crashed(id, reason) => EventError::Crashed(id, reason),
        }
    }
}

//! Supervisor error types.

use super::types::Strategy;
use crate::behavior::StartError;
use crate::core::Pid;
use crate::runtime::CallError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned by a child's start function.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StartChildError {
    /// The child's behavior failed to start, or returned `Ignore`.
    #[error(transparent)]
    Start(#[from] StartError),

    /// The start function failed for another reason.
    #[error("child failed to start: {0}")]
    Failed(String),
}

impl StartChildError {
    pub(super) fn is_ignore(&self) -> bool {
        matches!(self, StartChildError::Start(StartError::Ignore))
    }
}

/// Error returned by the supervisor's child management functions.
#[derive(Debug, Error)]
pub enum ChildError {
    /// No child with this id or pid.
    #[error("child {0:?} not found")]
    NotFound(String),

    /// The operation needs the child to be stopped first.
    #[error("child {0:?} is running")]
    Running(String),

    /// A stopped child with this id already exists.
    #[error("child {0:?} already present")]
    AlreadyPresent(String),

    /// A running child with this id already exists.
    #[error("child {0:?} already started as {1}")]
    AlreadyStarted(String, Pid),

    /// The child's start function failed.
    #[error("child {0:?} failed to start: {1}")]
    StartFailed(String, StartChildError),

    /// The operation does not apply to this strategy, e.g. a static child
    /// spec for a `SimpleOneForOne` supervisor.
    #[error("not supported by a {0:?} supervisor")]
    Unsupported(Strategy),

    /// The supervisor could not be reached.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// [`ChildError`]s raised by the supervisor, as they travel in a reply.
#[derive(Debug, Serialize, Deserialize)]
pub(super) enum Refusal {
    NotFound(String),
    Running(String),
    AlreadyPresent(String),
    AlreadyStarted(String, Pid),
    StartFailed(String, StartChildError),
    Unsupported(Strategy),
}

impl From<Refusal> for ChildError {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::NotFound(id) => ChildError::NotFound(id),
            Refusal::Running(id) => ChildError::Running(id),
            Refusal::AlreadyPresent(id) => ChildError::AlreadyPresent(id),
            Refusal::AlreadyStarted(id, pid) => ChildError::AlreadyStarted(id, pid),
            Refusal::StartFailed(id, error) => ChildError::StartFailed(id, error),
            Refusal::Unsupported(strategy) => ChildError::Unsupported(strategy),
        }
    }
}

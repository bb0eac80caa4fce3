//! Errors raised by the process runtime.

use crate::core::{Atom, ExitReason, Pid, TermError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message could not be enqueued.
#[derive(Debug, Error)]
pub enum SendError {
    /// The destination does not exist or its mailbox is closed.
    #[error("no process {0}")]
    NoProc(Pid),

    /// No name is registered under the given key.
    #[error("no process registered as {0:?}")]
    NotRegistered(String),

    /// The destination lives on a node the transport cannot reach.
    #[error("node {0} is unreachable")]
    NodeUnreachable(Atom),

    /// The payload could not be encoded.
    #[error(transparent)]
    Term(#[from] TermError),
}

/// A receive did not produce a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The timeout elapsed first. The process may keep receiving.
    #[error("receive timed out")]
    Timeout,

    /// The mailbox was closed.
    #[error("mailbox closed")]
    Closed,
}

/// A name registry operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RegistryError {
    /// The name is bound to another live process.
    #[error("name {name:?} is already registered to {holder}")]
    NameTaken {
        /// The contested name.
        name: String,
        /// The process currently holding it.
        holder: Pid,
    },

    /// The process to register is not alive on this node.
    #[error("no process {0}")]
    NoProc(Pid),
}

/// A synchronous call did not produce a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No reply arrived within the timeout. The callee may still be alive.
    #[error("call timed out")]
    Timeout,

    /// The callee did not exist when the call was made.
    #[error("no process {0}")]
    NoProc(Pid),

    /// No process is registered under the name the call was addressed to.
    #[error("no process registered as {0:?}")]
    NotRegistered(String),

    /// The callee exited before replying.
    #[error("callee exited: {0}")]
    LinkedExit(ExitReason),

    /// The callee's node cannot be reached.
    #[error("node {0} is unreachable")]
    NodeUnreachable(Atom),

    /// The request or the reply did not match the expected type.
    #[error("bad term: {0}")]
    BadTerm(String),
}

impl From<TermError> for CallError {
    fn from(err: TermError) -> Self {
        CallError::BadTerm(err.to_string())
    }
}

impl From<SendError> for CallError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::NoProc(pid) => CallError::NoProc(pid),
            SendError::NotRegistered(name) => CallError::NotRegistered(name),
            SendError::NodeUnreachable(node) => CallError::NodeUnreachable(node),
            SendError::Term(e) => CallError::from(e),
        }
    }
}

/// Establishing a link failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The peer does not exist or already terminated.
    #[error("no process {0}")]
    NoProc(Pid),
}

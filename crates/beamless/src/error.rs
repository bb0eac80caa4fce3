//! The crate-level error type.

use crate::application::ApplicationError;
use crate::behavior::StartError;
use crate::config::ConfigError;
use crate::core::TermError;
use crate::gen_event::EventError;
use crate::node::NodeError;
use crate::runtime::{CallError, LinkError, RecvError, RegistryError, SendError};
use crate::supervisor::{ChildError, StartChildError};
use thiserror::Error;

/// Any error raised by this crate.
///
/// Each module has its own error enum; this one collects them for code that
/// only needs to propagate failures with `?`.
#[derive(Debug, Error)]
pub enum Error {
    /// See [`SendError`].
    #[error(transparent)]
    Send(#[from] SendError),
    /// See [`RecvError`].
    #[error(transparent)]
    Recv(#[from] RecvError),
    /// See [`RegistryError`].
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// See [`CallError`].
    #[error(transparent)]
    Call(#[from] CallError),
    /// See [`LinkError`].
    #[error(transparent)]
    Link(#[from] LinkError),
    /// See [`StartError`].
    #[error(transparent)]
    Start(#[from] StartError),
    /// See [`ChildError`].
    #[error(transparent)]
    Child(#[from] ChildError),
    /// See [`StartChildError`].
    #[error(transparent)]
    StartChild(#[from] StartChildError),
    /// See [`EventError`].
    #[error(transparent)]
    Event(#[from] EventError),
    /// See [`ApplicationError`].
    #[error(transparent)]
    Application(#[from] ApplicationError),
    /// See [`NodeError`].
    #[error(transparent)]
    Node(#[from] NodeError),
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// See [`TermError`].
    #[error(transparent)]
    Term(#[from] TermError),
}

/// A `Result` defaulting to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Event managers with pluggable handlers.
//!
//! An [`EventManager`] is a process holding an ordered list of
//! [`EventHandler`]s, each under its own id. Every event sent with
//! [`EventManager::notify`] or [`EventManager::sync_notify`] goes to every
//! handler in the order they were added. A handler that returns
//! [`HandlerResult::Remove`] or panics is taken out of the list; the other
//! handlers and the manager keep running.

mod error;
mod handler;
mod manager;

pub use crate::behavior::{Info, StartError, StartOpts};
pub use error::EventError;
pub use handler::{EventHandler, HandlerReply, HandlerResult};
pub use manager::EventManager;

//! The handler trait and what handler callbacks return.

use crate::behavior::Info;
use crate::core::{ExitReason, RawTerm};
use async_trait::async_trait;

/// What a handler wants after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerResult {
    /// Stay installed.
    #[default]
    Ok,
    /// Uninstall this handler. Its `terminate` runs with
    /// [`ExitReason::Normal`].
    Remove,
}

/// A handler's answer to [`EventManager::call`](super::EventManager::call).
#[derive(Debug, Clone)]
pub enum HandlerReply {
    /// Reply and stay installed.
    Ok(RawTerm),
    /// Reply, then uninstall this handler.
    Remove(RawTerm),
}

/// One handler installed in an event manager.
///
/// The handler owns its state as `self`. Callbacks run inside the manager
/// process, one at a time.
#[async_trait]
pub trait EventHandler<E: Send + 'static>: Send + 'static {
    /// Runs when the handler is added. An error refuses the installation.
    async fn init(&mut self) -> Result<(), ExitReason> {
        Ok(())
    }

    /// Handles one event.
    async fn handle_event(&mut self, event: E) -> HandlerResult;

    /// Answers a request addressed to this handler by id. The default
    /// replies with `()`.
    async fn handle_call(&mut self, _request: RawTerm) -> HandlerReply {
        HandlerReply::Ok(RawTerm::from(Vec::new()))
    }

    /// Handles a message sent to the manager that is not an event.
    async fn handle_info(&mut self, _info: Info) -> HandlerResult {
        HandlerResult::Ok
    }

    /// Runs when the handler is removed or the manager stops.
    async fn terminate(&mut self, _reason: &ExitReason) {}
}

//! Events, transitions and actions.

use crate::behavior::{From, Info};
use crate::core::ExitReason;
use std::time::Duration;

/// What kind of event is being handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A synchronous request; answer it with [`Action::Reply`].
    Call(From),
    /// An asynchronous request.
    Cast,
    /// A plain message, trapped exit or monitor notification.
    Info,
    /// The state timeout fired.
    Timeout,
    /// An event the machine inserted itself with [`Action::NextEvent`].
    Internal,
}

/// An event delivered to
/// [`GenStatem::handle_event`](super::GenStatem::handle_event).
#[derive(Debug, Clone)]
pub enum Event<E> {
    /// A call carrying the caller's reply handle.
    Call(From, E),
    /// A cast.
    Cast(E),
    /// Anything else sent to the process.
    Info(Info),
    /// The state timeout elapsed without the state changing.
    Timeout,
    /// An event queued by [`Action::NextEvent`].
    Internal(E),
}

impl<E> Event<E> {
    /// The kind of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Call(from, _) => EventType::Call(*from),
            Event::Cast(_) => EventType::Cast,
            Event::Info(_) => EventType::Info,
            Event::Timeout => EventType::Timeout,
            Event::Internal(_) => EventType::Internal,
        }
    }
}

/// Side effects requested by a transition, applied in order.
#[derive(Debug, Clone)]
pub enum Action<R, E> {
    /// Answers a call.
    Reply(From, R),
    /// Delivers [`Event::Timeout`] after the duration unless the state
    /// changes first. Replaces any pending state timeout.
    StateTimeout(Duration),
    /// Handles `E` as an [`Event::Internal`] before the next mailbox message.
    NextEvent(E),
}

/// Result of [`GenStatem::init`](super::GenStatem::init).
#[derive(Debug)]
pub enum InitResult<S, D> {
    /// Start in state `S` with data `D`.
    Ok(S, D),
    /// Do not start; the process exits normally.
    Ignore,
    /// Do not start; the process exits with this reason.
    Stop(ExitReason),
}

/// Result of [`GenStatem::handle_event`](super::GenStatem::handle_event).
#[derive(Debug)]
pub enum Transition<S, R, E> {
    /// Stay in the current state.
    KeepState(Vec<Action<R, E>>),
    /// Move to a new state. Moving to a different state cancels the
    /// pending state timeout.
    NextState(S, Vec<Action<R, E>>),
    /// Apply the actions, run `terminate` and exit.
    Stop(ExitReason, Vec<Action<R, E>>),
}

impl<S, R, E> Transition<S, R, E> {
    /// Stay in the current state.
    pub fn keep_state() -> Self {
        Transition::KeepState(Vec::new())
    }

    /// Move to `state`.
    pub fn next_state(state: S) -> Self {
        Transition::NextState(state, Vec::new())
    }

    /// Stop with `reason`.
    pub fn stop(reason: ExitReason) -> Self {
        Transition::Stop(reason, Vec::new())
    }

    /// Adds an action.
    pub fn with(mut self, action: Action<R, E>) -> Self {
        match &mut self {
            Transition::KeepState(actions)
            | Transition::NextState(_, actions)
            | Transition::Stop(_, actions) => actions.push(action),
        }
        self
    }

    /// Adds a reply action.
    pub fn reply(self, from: From, reply: R) -> Self {
        self.with(Action::Reply(from, reply))
    }
}

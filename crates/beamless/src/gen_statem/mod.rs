//! State machines with an explicit state separate from their data.
//!
//! A [`GenStatem`] receives every input as an [`Event`] together with its
//! current state, and answers with a [`Transition`]: keep the state, move to
//! a new one, or stop, optionally with [`Action`]s such as replies, a state
//! timeout or an internal follow-up event.

mod statem;
mod types;

pub use crate::behavior::{From, Info, StartError, StartOpts};
pub use crate::runtime::CallError;
pub use statem::{call, cast, start, start_link, start_opts, stop, GenStatem, StatemTransition};
pub use types::{Action, Event, EventType, InitResult, Transition};

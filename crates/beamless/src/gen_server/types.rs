//! Callback results.

use crate::core::ExitReason;

/// Result of [`GenServer::init`](super::GenServer::init).
#[derive(Debug)]
pub enum InitResult<S> {
    /// Start serving with this state.
    Ok(S),
    /// Do not start; the process exits normally and the start returns
    /// [`StartError::Ignore`](super::StartError::Ignore).
    Ignore,
    /// Do not start; the process exits with this reason.
    Stop(ExitReason),
}

impl<S> InitResult<S> {
    /// Start serving with `state`.
    pub fn ok(state: S) -> Self {
        InitResult::Ok(state)
    }

    /// Refuse to start.
    pub fn stop(reason: ExitReason) -> Self {
        InitResult::Stop(reason)
    }
}

/// Result of [`GenServer::handle_call`](super::GenServer::handle_call).
#[derive(Debug)]
pub enum CallResult<R> {
    /// Reply to the caller and keep serving.
    Reply(R),
    /// Keep serving without replying now; answer later with
    /// [`reply`](super::reply).
    NoReply,
    /// Stop without replying.
    Stop(ExitReason),
    /// Run `terminate`, then reply, then exit.
    StopReply(ExitReason, R),
}

impl<R> CallResult<R> {
    /// Reply with `reply`.
    pub fn reply(reply: R) -> Self {
        CallResult::Reply(reply)
    }

    /// Defer the reply.
    pub fn noreply() -> Self {
        CallResult::NoReply
    }

    /// Stop, replying `reply` first.
    pub fn stop(reason: ExitReason, reply: R) -> Self {
        CallResult::StopReply(reason, reply)
    }
}

/// Result of [`GenServer::handle_cast`](super::GenServer::handle_cast) and
/// [`GenServer::handle_info`](super::GenServer::handle_info).
#[derive(Debug, Default)]
pub enum CastResult {
    /// Keep serving.
    #[default]
    NoReply,
    /// Run `terminate` and exit.
    Stop(ExitReason),
}

/// Result of [`GenServer::handle_info`](super::GenServer::handle_info).
pub type InfoResult = CastResult;

//! Access to the current process from anywhere inside its task.
//!
//! The scheduler installs the process's [`Context`] as a tokio task-local
//! before the body runs, so behavior callbacks and helper functions can call
//! [`current_pid`], [`recv`] or [`send`] without threading a context through.

use super::context::Context;
use super::error::{RecvError, SendError};
use super::mailbox::Message;
use crate::core::{Pid, Term};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

tokio::task_local! {
    static CONTEXT: Arc<Context>;
}

pub(crate) fn scope<F: Future>(ctx: Arc<Context>, f: F) -> impl Future<Output = F::Output> {
    CONTEXT.scope(ctx, f)
}

/// The current process's context, or `None` outside a process.
pub fn try_context() -> Option<Arc<Context>> {
    CONTEXT.try_with(Arc::clone).ok()
}

/// The current process's context.
///
/// # Panics
///
/// Panics if called outside a process.
pub fn context() -> Arc<Context> {
    CONTEXT.with(Arc::clone)
}

/// Runs `f` with the current context.
///
/// # Panics
///
/// Panics if called outside a process.
pub fn with_ctx<F, R>(f: F) -> R
where
    F: FnOnce(&Context) -> R,
{
    CONTEXT.with(|ctx| f(ctx))
}

/// The current process's pid.
///
/// # Panics
///
/// Panics if called outside a process.
pub fn current_pid() -> Pid {
    CONTEXT.with(|ctx| ctx.pid())
}

/// The current process's pid, or `None` outside a process.
pub fn try_current_pid() -> Option<Pid> {
    CONTEXT.try_with(|ctx| ctx.pid()).ok()
}

/// Waits for the next message of the current process.
///
/// # Panics
///
/// Panics if called outside a process.
pub async fn recv() -> Result<Message, RecvError> {
    context().recv().await
}

/// Waits at most `timeout` for the next message of the current process.
///
/// # Panics
///
/// Panics if called outside a process.
pub async fn recv_timeout(timeout: Duration) -> Result<Message, RecvError> {
    context().recv_timeout(timeout).await
}

/// Takes the next queued message of the current process, if any.
///
/// # Panics
///
/// Panics if called outside a process.
pub fn try_recv() -> Result<Option<Message>, RecvError> {
    with_ctx(|ctx| ctx.try_recv())
}

/// Sends `msg` from the current process to `to`.
///
/// # Panics
///
/// Panics if called outside a process.
pub fn send<T: Term>(to: Pid, msg: &T) -> Result<(), SendError> {
    with_ctx(|ctx| ctx.send(to, msg))
}

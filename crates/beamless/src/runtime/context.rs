//! A process's view of the runtime.
//!
//! Every process body runs with a [`Context`] installed as a task-local (see
//! [`task_local`](super::task_local)). It owns the mailbox and knows the
//! process's own handle, its parent and the runtime it belongs to.

use super::error::{LinkError, RecvError, RegistryError, SendError};
use super::mailbox::{Content, Mailbox, Message};
use super::process_handle::ProcessHandle;
use super::scheduler::RuntimeHandle;
use crate::core::{ExitReason, Pid, Ref, Term};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

/// The execution context of one process.
pub struct Context {
    pid: Pid,
    parent: Option<Pid>,
    handle: ProcessHandle,
    runtime: RuntimeHandle,
    mailbox: Mutex<Mailbox>,
}

impl Context {
    pub(crate) fn new(
        handle: ProcessHandle,
        parent: Option<Pid>,
        runtime: RuntimeHandle,
        mailbox: Mailbox,
    ) -> Self {
        Self {
            pid: handle.pid(),
            parent,
            handle,
            runtime,
            mailbox: Mutex::new(mailbox),
        }
    }

    /// This process's pid.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The process this one was spawn-linked to, if any.
    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    /// The runtime this process belongs to.
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    pub(crate) fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Whether an exit signal from `from` is an order to stop: it came from
    /// the parent or from the node shutting down.
    pub fn is_stop_signal(&self, from: Pid) -> bool {
        Some(from) == self.parent || from == self.runtime.system_pid()
    }

    /// Waits for the next message.
    pub async fn recv(&self) -> Result<Message, RecvError> {
        self.mailbox.lock().await.recv().await
    }

    /// Waits at most `timeout` for the next message.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvError> {
        self.mailbox.lock().await.recv_timeout(timeout).await
    }

    /// Takes the next message if one is queued.
    pub fn try_recv(&self) -> Result<Option<Message>, RecvError> {
        match self.mailbox.try_lock() {
            Ok(mut mailbox) => mailbox.try_recv(),
            Err(_) => Ok(None),
        }
    }

    pub(crate) fn close_mailbox(&self) -> usize {
        match self.mailbox.try_lock() {
            Ok(mut mailbox) => mailbox.close(),
            Err(_) => 0,
        }
    }

    /// Sends `msg` to `to` as an info message.
    pub fn send<T: Term>(&self, to: Pid, msg: &T) -> Result<(), SendError> {
        self.send_content(to, Content::Info(msg.encode()?))
    }

    /// Sends raw content to `to`.
    pub fn send_content(&self, to: Pid, content: Content) -> Result<(), SendError> {
        self.runtime
            .registry()
            .send(Message::new(self.pid, to, content))
    }

    /// Starts or stops converting exit signals into [`Content::Exit`]
    /// messages. Returns the previous setting.
    pub fn set_trap_exit(&self, trap: bool) -> bool {
        self.handle.set_trap_exit(trap)
    }

    /// Whether exit signals arrive as messages.
    pub fn is_trapping_exits(&self) -> bool {
        self.handle.is_trapping_exits()
    }

    /// Links this process with `peer`.
    pub fn link(&self, peer: Pid) -> Result<(), LinkError> {
        self.runtime.link(self.pid, peer)
    }

    /// Removes the link with `peer`, if any.
    pub fn unlink(&self, peer: Pid) {
        self.runtime.unlink(self.pid, peer)
    }

    /// Monitors `target`. Exactly one `Down` carrying the returned ref
    /// follows, unless the monitor is removed first.
    pub fn monitor(&self, target: Pid) -> Ref {
        self.runtime.monitor(self.pid, target)
    }

    /// Removes a monitor. A `Down` already queued stays in the mailbox.
    pub fn demonitor(&self, reference: Ref) {
        self.runtime.demonitor(self.pid, reference)
    }

    /// Sends an exit signal to `target`.
    pub fn exit(&self, target: Pid, reason: ExitReason) {
        self.runtime.exit_from(self.pid, target, reason)
    }

    /// Registers this process as `name`.
    pub fn register(&self, name: impl Into<String>) -> Result<(), RegistryError> {
        self.runtime.registry().register(name, self.pid)
    }

    /// Releases `name`.
    pub fn unregister(&self, name: &str) -> Option<Pid> {
        self.runtime.registry().unregister(name)
    }

    /// Looks up a registered name.
    pub fn whereis(&self, name: &str) -> Option<Pid> {
        self.runtime.registry().whereis(name)
    }

    /// Spawns an unlinked process.
    pub fn spawn<F, Fut>(&self, f: F) -> Pid
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<ExitReason>,
    {
        self.runtime.spawn(f)
    }

    /// Spawns a process linked to this one.
    pub fn spawn_link<F, Fut>(&self, f: F) -> Pid
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<ExitReason>,
    {
        self.runtime.spawn_link(self.pid, f)
    }

    /// Spawns a process monitored by this one.
    pub fn spawn_monitor<F, Fut>(&self, f: F) -> (Pid, Ref)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<ExitReason>,
    {
        self.runtime.spawn_monitor(self.pid, f)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("pid", &self.pid)
            .field("parent", &self.parent)
            .finish()
    }
}

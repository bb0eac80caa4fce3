//! Spawning, exit propagation and shutdown.
//!
//! Each process is a tokio task. The task races the process body against a
//! kill switch; whichever finishes first decides the exit reason. A panic in
//! the body is caught and becomes [`ExitReason::Error`]. When the body is
//! done the scheduler marks the process as exiting, closes its mailbox,
//! removes it from the registry and only then notifies links and monitors,
//! so anyone reacting to the notification sees the process fully gone.

use super::context::Context;
use super::error::{CallError, LinkError, SendError};
use super::mailbox::{Content, Mailbox, Message};
use super::process_handle::{Awaited, ProcessHandle, SignalOrigin};
use super::registry::ProcessRegistry;
use super::server_ref::ServerRef;
use super::task_local;
use super::transport::{DeliveryOutcome, Transport};
use crate::core::{next_creation, Atom, ExitReason, Pid, PidAllocator, RawTerm, Ref, Term};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Owns the process table of one node incarnation.
///
/// Dropping the `Runtime` does not stop running processes; call
/// [`RuntimeHandle::shutdown`] for that.
#[derive(Debug)]
pub struct Runtime {
    handle: RuntimeHandle,
}

impl Runtime {
    /// A runtime for the node called `node`.
    pub fn new(node: &str) -> Self {
        Self::with_node(Atom::new(node))
    }

    /// A runtime whose node name comes from `transport`; messages for other
    /// nodes are routed through it.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        let runtime = Self::with_node(transport.local_node_name());
        runtime.handle.registry().set_transport(transport);
        runtime
    }

    fn with_node(node: Atom) -> Self {
        let pids = PidAllocator::new(node, next_creation());
        // The first pid stands for the runtime itself in signals it sends.
        let system = pids.allocate();
        tracing::debug!(%node, creation = pids.creation(), "runtime created");
        Self {
            handle: RuntimeHandle {
                inner: Arc::new(Inner {
                    registry: ProcessRegistry::new(node),
                    pids,
                    system,
                    staged: Mutex::new(HashMap::new()),
                    next_stage: AtomicU64::new(0),
                    shutting_down: AtomicBool::new(false),
                }),
            },
        }
    }

    /// A cloneable handle to this runtime.
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }
}

struct Inner {
    registry: ProcessRegistry,
    pids: PidAllocator,
    system: Pid,
    /// Local-only values handed to a process through a message, such as
    /// child specs and event handlers, which hold closures.
    staged: Mutex<HashMap<u64, Box<dyn Any + Send>>>,
    next_stage: AtomicU64,
    shutting_down: AtomicBool,
}

/// Time a shutdown waits for killed processes after its deadline.
pub const KILL_GRACE: Duration = Duration::from_millis(100);

/// How the processes of a shutdown ended. Every process alive at the start
/// of the shutdown, or spawned during it, is counted exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Processes that exited before the deadline.
    pub graceful: usize,
    /// Processes killed when the deadline passed.
    pub forced: usize,
    /// Killed processes that had not terminated when the shutdown returned,
    /// usually because they block their worker thread.
    pub lingering: usize,
}

/// A cloneable handle to a [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<Inner>,
}

impl RuntimeHandle {
    /// The process and name tables.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.inner.registry
    }

    /// The node this runtime serves.
    pub fn node(&self) -> Atom {
        self.inner.pids.node()
    }

    /// The node incarnation number stamped into every pid.
    pub fn creation(&self) -> u32 {
        self.inner.pids.creation()
    }

    /// The pid the runtime uses as sender of signals it originates.
    pub fn system_pid(&self) -> Pid {
        self.inner.system
    }

    /// Whether [`RuntimeHandle::shutdown`] has started.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Spawns a process.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<F, Fut>(&self, f: F) -> Pid
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<ExitReason>,
    {
        self.spawn_opts(f, None, None).0
    }

    /// Spawns a process linked to `link_to` before it starts running.
    ///
    /// If `link_to` is not alive the new process receives a `NoProc` exit
    /// signal and terminates straight away.
    pub fn spawn_link<F, Fut>(&self, link_to: Pid, f: F) -> Pid
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<ExitReason>,
    {
        self.spawn_opts(f, Some(link_to), None).0
    }

    /// Spawns a process monitored by `watcher` before it starts running.
    pub fn spawn_monitor<F, Fut>(&self, watcher: Pid, f: F) -> (Pid, Ref)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<ExitReason>,
    {
        let (pid, reference) = self.spawn_opts(f, None, Some(watcher));
        (pid, reference.unwrap_or_else(Ref::new))
    }

    /// Spawns a process with an optional link and an optional monitor.
    pub fn spawn_opts<F, Fut>(
        &self,
        f: F,
        link_to: Option<Pid>,
        monitor_by: Option<Pid>,
    ) -> (Pid, Option<Ref>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Into<ExitReason>,
    {
        let registry = self.registry();
        let pid = self.inner.pids.allocate();
        let (mailbox, sender) = Mailbox::new();
        let (kill_tx, kill_rx) = oneshot::channel();
        let handle = ProcessHandle::new(pid, sender, kill_tx);

        let mut dead_parent = false;
        if let Some(parent) = link_to {
            match registry.get_process(parent) {
                Some(parent_handle) if parent_handle.add_link(pid) => {
                    handle.add_link(parent);
                }
                _ => dead_parent = true,
            }
        }

        let reference = monitor_by.map(|watcher| {
            let reference = Ref::new();
            if let Some(watcher_handle) = registry.get_process(watcher) {
                watcher_handle.add_monitor(reference, pid);
                handle.add_monitored_by(reference, watcher);
            }
            reference
        });

        registry.add_process(handle.clone());
        if dead_parent {
            handle.kill(ExitReason::NoProc);
        }

        tracing::debug!(%pid, parent = ?link_to, "process spawned");
        let ctx = Arc::new(Context::new(handle, link_to, self.clone(), mailbox));
        let runtime = self.clone();
        tokio::spawn(async move {
            let body = task_local::scope(ctx.clone(), async move { f().await.into() });
            let reason = run_until_killed(body, kill_rx).await;
            runtime.finalize(&ctx, reason);
        });

        (pid, reference)
    }

    fn finalize(&self, ctx: &Context, reason: ExitReason) {
        let pid = ctx.pid();
        let registry = self.registry();
        let Some(departure) = ctx.handle().begin_exit() else {
            return;
        };
        let discarded = ctx.close_mailbox();
        registry.remove_process(pid);

        if reason.is_clean() {
            tracing::debug!(%pid, %reason, discarded, "process exited");
        } else {
            tracing::warn!(%pid, %reason, discarded, "process exited abnormally");
        }

        for (reference, target) in departure.monitors {
            if let Some(target) = registry.get_process(target) {
                target.remove_monitored_by(reference);
            }
        }

        for peer in departure.links {
            if let Some(peer) = registry.get_process(peer) {
                peer.remove_link(pid);
                peer.signal(pid, reason.clone(), SignalOrigin::Link);
            }
        }

        for (reference, watcher) in departure.monitored_by {
            if let Some(watcher) = registry.get_process(watcher) {
                watcher.remove_monitor(reference);
            }
            let down = Content::Down {
                reference,
                reason: reason.clone(),
            };
            let _ = registry.send(Message::new(pid, watcher, down));
        }

        ctx.handle().finish_exit(reason);
    }

    /// Links `a` and `b`.
    ///
    /// If `b` does not exist the error is returned and, when `a` traps
    /// exits, an `Exit` message with reason `NoProc` is also delivered to it.
    pub fn link(&self, a: Pid, b: Pid) -> Result<(), LinkError> {
        let registry = self.registry();
        let a_handle = registry.get_process(a).ok_or(LinkError::NoProc(a))?;
        if a == b {
            return Ok(());
        }

        match registry.get_process(b) {
            Some(b_handle) if b_handle.add_link(a) => {
                if a_handle.add_link(b) {
                    Ok(())
                } else {
                    b_handle.remove_link(a);
                    Err(LinkError::NoProc(a))
                }
            }
            _ => {
                if a_handle.is_trapping_exits() {
                    let _ = a_handle.deliver(Message::new(b, a, Content::Exit(ExitReason::NoProc)));
                }
                Err(LinkError::NoProc(b))
            }
        }
    }

    /// Removes the link between `a` and `b`, if any.
    pub fn unlink(&self, a: Pid, b: Pid) {
        let registry = self.registry();
        if let Some(handle) = registry.get_process(a) {
            handle.remove_link(b);
        }
        if let Some(handle) = registry.get_process(b) {
            handle.remove_link(a);
        }
    }

    /// Makes `watcher` monitor `target`. If `target` does not exist the
    /// `Down` with reason `NoProc` is delivered immediately.
    pub fn monitor(&self, watcher: Pid, target: Pid) -> Ref {
        let registry = self.registry();
        let reference = Ref::new();
        let watcher_handle = registry.get_process(watcher);
        if let Some(handle) = &watcher_handle {
            handle.add_monitor(reference, target);
        }

        let installed = registry
            .get_process(target)
            .is_some_and(|handle| handle.add_monitored_by(reference, watcher));

        if !installed {
            if let Some(handle) = &watcher_handle {
                handle.remove_monitor(reference);
            }
            let down = Content::Down {
                reference,
                reason: ExitReason::NoProc,
            };
            let _ = registry.send(Message::new(target, watcher, down));
        }
        reference
    }

    /// Removes the monitor `reference` held by `watcher`.
    pub fn demonitor(&self, watcher: Pid, reference: Ref) {
        let registry = self.registry();
        let target = registry
            .get_process(watcher)
            .and_then(|handle| handle.remove_monitor(reference));
        if let Some(target) = target.and_then(|pid| registry.get_process(pid)) {
            target.remove_monitored_by(reference);
        }
    }

    /// Sends an exit signal to `target` on behalf of the runtime.
    pub fn exit(&self, target: Pid, reason: ExitReason) {
        self.exit_from(self.system_pid(), target, reason)
    }

    pub(crate) fn exit_from(&self, from: Pid, target: Pid, reason: ExitReason) {
        if let Some(handle) = self.registry().get_process(target) {
            handle.signal(from, reason, SignalOrigin::Exit);
        }
    }

    /// Whether `pid` is a live process on this node.
    pub fn is_alive(&self, pid: Pid) -> bool {
        self.registry()
            .get_process(pid)
            .is_some_and(|handle| handle.is_alive())
    }

    /// Waits for `pid` to terminate and returns its exit reason, or `NoProc`
    /// if it is not alive.
    pub async fn join(&self, pid: Pid) -> ExitReason {
        match self.registry().get_process(pid) {
            Some(handle) => handle.join().await,
            None => ExitReason::NoProc,
        }
    }

    /// Resolves a pid or registered name.
    pub fn resolve(&self, server: &ServerRef) -> Result<Pid, SendError> {
        match server {
            ServerRef::Pid(pid) => Ok(*pid),
            ServerRef::Name(name) => self
                .registry()
                .whereis(name)
                .ok_or_else(|| SendError::NotRegistered(name.clone())),
        }
    }

    /// Sends `content` to `to`, from the current process or, outside a
    /// process, from the runtime.
    pub fn send_content(&self, to: Pid, content: Content) -> Result<(), SendError> {
        let from = self.current_pid().unwrap_or(self.inner.system);
        self.registry().send(Message::new(from, to, content))
    }

    /// Sends `msg` to `to` as an info message.
    pub fn send<T: Term>(&self, to: Pid, msg: &T) -> Result<(), SendError> {
        self.send_content(to, Content::Info(msg.encode()?))
    }

    /// Asks the behavior process `to` to run `terminate` and exit with
    /// `reason`, then waits until it is gone. `None` waits forever.
    pub async fn request_stop(
        &self,
        to: Pid,
        reason: ExitReason,
        timeout: Option<Duration>,
    ) -> Result<(), CallError> {
        if !self.is_alive(to) {
            return Err(CallError::NoProc(to));
        }
        let caller = Caller::current(self);
        let exited = self.watch_exit(caller.handle(), to);
        self.send_content(to, Content::Stop(reason.clone()))?;

        let actual = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, exited.wait())
                .await
                .map_err(|_| CallError::Timeout)?,
            None => exited.wait().await,
        };
        if actual == reason {
            Ok(())
        } else {
            Err(CallError::LinkedExit(actual))
        }
    }

    /// Enqueues a message that a transport received from another node.
    pub fn deliver_incoming(&self, message: Message) -> DeliveryOutcome {
        self.registry().deliver_local(message)
    }

    fn current_pid(&self) -> Option<Pid> {
        task_local::try_context()
            .filter(|ctx| self.same_runtime(ctx.runtime()))
            .map(|ctx| ctx.pid())
    }

    fn same_runtime(&self, other: &RuntimeHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sends `request` to `to` and waits for the reply.
    ///
    /// The callee is monitored for the duration of the call, so its death
    /// ends the wait with [`CallError::LinkedExit`]. `None` waits forever.
    pub async fn call_raw(
        &self,
        to: Pid,
        request: RawTerm,
        timeout: Option<Duration>,
    ) -> Result<RawTerm, CallError> {
        let caller = Caller::current(self);
        let me = caller.handle();
        let reference = Ref::new();
        let rx = me.await_ref(reference).ok_or(CallError::NoProc(me.pid()))?;

        let callee = if self.registry().is_local(to) {
            match self.registry().get_process(to) {
                Some(handle) if handle.add_monitored_by(reference, me.pid()) => Some(handle),
                _ => {
                    me.cancel_await(reference);
                    return Err(CallError::NoProc(to));
                }
            }
        } else {
            None
        };
        // Like `demonitor(Ref, [flush])`: a `Down` already sent for the call
        // monitor must not reach the mailbox.
        let cleanup = || {
            let down_in_flight = callee
                .as_ref()
                .is_some_and(|callee| !callee.remove_monitored_by(reference));
            me.finish_await(reference, down_in_flight);
        };

        let call = Content::Call { reference, request };
        if let Err(e) = self.registry().send(Message::new(me.pid(), to, call)) {
            cleanup();
            return Err(e.into());
        }

        let outcome = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    cleanup();
                    tracing::debug!(caller = %me.pid(), callee = %to, "call timed out");
                    return Err(CallError::Timeout);
                }
            },
            None => rx.await,
        };
        cleanup();

        match outcome {
            Ok(Awaited::Reply(reply)) => Ok(reply),
            Ok(Awaited::Down(ExitReason::NoProc)) => Err(CallError::NoProc(to)),
            Ok(Awaited::Down(reason)) => Err(CallError::LinkedExit(reason)),
            // Our own process is exiting.
            Err(_) => Err(CallError::NoProc(me.pid())),
        }
    }

    /// Answers the call identified by `reference` from `caller`.
    pub fn reply_raw(&self, caller: Pid, reference: Ref, reply: RawTerm) -> Result<(), SendError> {
        self.send_content(caller, Content::Reply { reference, reply })
    }

    /// Monitors `target` on behalf of `watcher` and returns a future that
    /// resolves to the exit reason, bypassing `watcher`'s mailbox.
    pub(crate) fn watch_exit(&self, watcher: &ProcessHandle, target: Pid) -> ExitWatch {
        let reference = Ref::new();
        let Some(rx) = watcher.await_ref(reference) else {
            return ExitWatch { rx: None };
        };
        let installed = self
            .registry()
            .get_process(target)
            .is_some_and(|handle| handle.add_monitored_by(reference, watcher.pid()));
        if !installed {
            watcher.cancel_await(reference);
            return ExitWatch { rx: None };
        }
        ExitWatch { rx: Some(rx) }
    }

    /// Terminates `target` with the exit `reason` and waits for it, killing
    /// it if it is still alive after `timeout`. `None` waits forever.
    pub(crate) async fn stop_process(
        &self,
        watcher: &ProcessHandle,
        target: Pid,
        reason: ExitReason,
        timeout: Option<Duration>,
    ) -> ExitReason {
        let mut exited = Box::pin(self.watch_exit(watcher, target).wait());
        self.exit_from(watcher.pid(), target, reason);
        let Some(timeout) = timeout else {
            return exited.await;
        };
        match tokio::time::timeout(timeout, &mut exited).await {
            Ok(reason) => reason,
            Err(_) => {
                tracing::warn!(pid = %target, ?timeout, "shutdown timed out, killing");
                self.exit_from(watcher.pid(), target, ExitReason::Killed);
                exited.await
            }
        }
    }

    pub(crate) fn stage(&self, value: Box<dyn Any + Send>) -> u64 {
        let key = self.inner.next_stage.fetch_add(1, Ordering::Relaxed);
        self.inner.staged.lock().insert(key, value);
        key
    }

    pub(crate) fn unstage<T: 'static>(&self, key: u64) -> Option<T> {
        let value = self.inner.staged.lock().remove(&key)?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    /// Asks every process to stop with [`ExitReason::Shutdown`] and kills
    /// whatever is still alive once `timeout` has passed.
    ///
    /// Processes are signalled oldest first, so supervisors hear about the
    /// shutdown before the exits of their children. A killed process only
    /// goes away at its next await point; those that do not within
    /// [`KILL_GRACE`] are reported as lingering and left behind.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.mark_shutting_down();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut handles = self.registry().handles();
        handles.sort_by_key(|handle| (handle.pid().serial(), handle.pid().id()));
        tracing::info!(node = %self.node(), processes = handles.len(), "shutting down");

        for handle in &handles {
            handle.signal(self.inner.system, ExitReason::Shutdown, SignalOrigin::Exit);
        }
        let joins = futures::future::join_all(handles.iter().map(|handle| handle.join()));
        let _ = tokio::time::timeout_at(deadline, joins).await;

        // Includes processes spawned while shutting down.
        let stragglers = self.registry().handles();
        for handle in &stragglers {
            handle.kill(ExitReason::Killed);
        }
        let kills = futures::future::join_all(stragglers.iter().map(|handle| handle.join()));
        let _ = tokio::time::timeout_at(deadline + KILL_GRACE, kills).await;

        let lingering = stragglers.iter().filter(|handle| !handle.has_exited()).count();
        let report = ShutdownReport {
            graceful: handles
                .iter()
                .filter(|h| !stragglers.iter().any(|s| s.pid() == h.pid()))
                .count(),
            forced: stragglers.len() - lingering,
            lingering,
        };
        if report.forced > 0 {
            tracing::warn!(forced = report.forced, "killed processes that outlived the shutdown");
        }
        if report.lingering > 0 {
            tracing::error!(lingering = report.lingering, "processes ignored the kill, leaving them behind");
        }
        report
    }

    pub(crate) fn mark_shutting_down(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("node", &self.node())
            .field("creation", &self.creation())
            .field("processes", &self.registry().len())
            .finish()
    }
}

async fn run_until_killed<B>(body: B, mut kill: oneshot::Receiver<ExitReason>) -> ExitReason
where
    B: Future<Output = ExitReason>,
{
    let body = AssertUnwindSafe(body).catch_unwind();
    tokio::select! {
        biased;
        Ok(reason) = &mut kill => reason,
        outcome = body => match outcome {
            Ok(reason) => reason,
            Err(panic) => ExitReason::Error(panic_message(panic.as_ref())),
        },
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Resolves once a watched process has exited.
pub(crate) struct ExitWatch {
    rx: Option<oneshot::Receiver<Awaited>>,
}

impl ExitWatch {
    pub(crate) async fn wait(self) -> ExitReason {
        let Some(rx) = self.rx else {
            return ExitReason::NoProc;
        };
        match rx.await {
            Ok(Awaited::Down(reason)) => reason,
            Ok(Awaited::Reply(_)) | Err(_) => ExitReason::NoProc,
        }
    }
}

/// The identity a call is made from: the current process, or a temporary
/// registry entry when called from outside any process.
enum Caller {
    Process(ProcessHandle),
    Detached {
        handle: ProcessHandle,
        registry: ProcessRegistry,
        _mailbox: Mailbox,
    },
}

impl Caller {
    fn current(runtime: &RuntimeHandle) -> Self {
        let ctx = task_local::try_context().filter(|ctx| runtime.same_runtime(ctx.runtime()));
        if let Some(ctx) = ctx {
            return Caller::Process(ctx.handle().clone());
        }

        let pid = runtime.inner.pids.allocate();
        let (mailbox, sender) = Mailbox::new();
        let (kill, _) = oneshot::channel();
        let handle = ProcessHandle::new(pid, sender, kill);
        runtime.registry().add_process(handle.clone());
        Caller::Detached {
            handle,
            registry: runtime.registry().clone(),
            _mailbox: mailbox,
        }
    }

    fn handle(&self) -> &ProcessHandle {
        match self {
            Caller::Process(handle) | Caller::Detached { handle, .. } => handle,
        }
    }
}

impl Drop for Caller {
    fn drop(&mut self) {
        if let Caller::Detached { handle, registry, .. } = self {
            handle.begin_exit();
            registry.remove_process(handle.pid());
            handle.finish_exit(ExitReason::Normal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::task_local::{current_pid, recv, recv_timeout, with_ctx};
    use crate::runtime::RecvError;

    fn runtime() -> RuntimeHandle {
        Runtime::new("scheduler@test").handle()
    }

    #[tokio::test]
    async fn spawned_process_runs_and_leaves_the_registry() {
        let rt = runtime();
        let (tx, rx) = oneshot::channel();
        let pid = rt.spawn(move || async move {
            let _ = tx.send(current_pid());
        });
        let handle = rt.registry().get_process(pid).unwrap();

        assert_eq!(rx.await.unwrap(), pid);
        assert_eq!(handle.join().await, ExitReason::Normal);
        assert!(!rt.registry().contains(pid));
        assert_eq!(rt.join(pid).await, ExitReason::NoProc);
    }

    #[tokio::test]
    async fn panics_become_error_exits() {
        let rt = runtime();
        let (tx, rx) = oneshot::channel();
        let watcher = rt.spawn(move || async move {
            let _ = tx.send(recv().await.map(|m| m.content));
        });
        let (pid, reference) = rt.spawn_monitor(watcher, || async {
            panic!("transition failed") as ()
        });
        let handle = rt.registry().get_process(pid).unwrap();

        let expected = ExitReason::error("transition failed");
        assert_eq!(handle.join().await, expected);
        match rx.await.unwrap() {
            Ok(Content::Down { reference: r, reason }) => {
                assert_eq!(r, reference);
                assert_eq!(reason, expected);
            }
            other => panic!("expected Down, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn monitor_fires_exactly_once() {
        let rt = runtime();
        let (tx, rx) = oneshot::channel();
        let target = rt.spawn(|| async {
            let _ = recv().await;
            ExitReason::error("crashed")
        });

        rt.spawn(move || async move {
            let reference = with_ctx(|ctx| ctx.monitor(target));
            with_ctx(|ctx| ctx.send(target, &"go".to_string())).unwrap();
            let first = recv().await.unwrap();
            let second = recv_timeout(Duration::from_millis(50)).await;
            let _ = tx.send((reference, first, second.is_err()));
        });

        let (reference, first, nothing_more) = rx.await.unwrap();
        match first.content {
            Content::Down { reference: r, reason } => {
                assert_eq!(r, reference);
                assert_eq!(reason, ExitReason::error("crashed"));
                assert_eq!(first.from, target);
            }
            other => panic!("expected Down, got {other:?}"),
        }
        assert!(nothing_more);
    }

    #[tokio::test]
    async fn monitoring_a_dead_process_yields_noproc() {
        let rt = runtime();
        let ghost = Pid::from_parts(rt.node(), 9_999, 0, rt.creation());
        let (tx, rx) = oneshot::channel();
        rt.spawn(move || async move {
            let reference = with_ctx(|ctx| ctx.monitor(ghost));
            let message = recv().await.unwrap();
            let _ = tx.send((reference, message));
        });

        let (reference, message) = rx.await.unwrap();
        assert!(matches!(
            message.content,
            Content::Down { reference: r, reason: ExitReason::NoProc } if r == reference
        ));
    }

    #[tokio::test]
    async fn linking_a_dead_process_while_trapping() {
        let rt = runtime();
        let ghost = Pid::from_parts(rt.node(), 9_998, 0, rt.creation());
        let (tx, rx) = oneshot::channel();
        rt.spawn(move || async move {
            with_ctx(|ctx| ctx.set_trap_exit(true));
            let linked = with_ctx(|ctx| ctx.link(ghost));
            let message = recv().await.unwrap();
            let _ = tx.send((linked, message));
        });

        let (linked, message) = rx.await.unwrap();
        assert_eq!(linked, Err(LinkError::NoProc(ghost)));
        assert!(matches!(message.content, Content::Exit(ExitReason::NoProc)));
        assert_eq!(message.from, ghost);
    }

    #[tokio::test]
    async fn spawn_link_to_dead_parent_dies_with_noproc() {
        let rt = runtime();
        let ghost = Pid::from_parts(rt.node(), 9_997, 0, rt.creation());
        let child = rt.spawn_link(ghost, || async {
            std::future::pending::<()>().await;
        });
        let handle = rt.registry().get_process(child).unwrap();
        assert_eq!(handle.join().await, ExitReason::NoProc);
    }

    #[tokio::test]
    async fn calls_from_outside_a_process() {
        let rt = runtime();
        let echo = rt.spawn(|| async {
            loop {
                let Ok(message) = recv().await else { break };
                if let Content::Call { reference, request } = message.content {
                    let n: u32 = request.decode().unwrap();
                    with_ctx(|ctx| {
                        ctx.runtime()
                            .reply_raw(message.from, reference, (n * 2).encode().unwrap())
                    })
                    .unwrap();
                }
            }
        });

        let reply = rt
            .call_raw(echo, 21u32.encode().unwrap(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(reply.decode::<u32>().unwrap(), 42);

        // The temporary caller identity is gone again.
        assert_eq!(rt.registry().len(), 1);
    }

    #[tokio::test]
    async fn call_to_a_process_that_dies_returns_linked_exit() {
        let rt = runtime();
        let doomed = rt.spawn(|| async {
            let _ = recv().await;
            ExitReason::error("no reply for you")
        });

        let result = rt
            .call_raw(doomed, ().encode().unwrap(), Some(Duration::from_secs(1)))
            .await;
        assert_eq!(
            result,
            Err(CallError::LinkedExit(ExitReason::error("no reply for you")))
        );
    }

    #[tokio::test]
    async fn exit_with_killed_cannot_be_trapped() {
        let rt = runtime();
        let pid = rt.spawn(|| async {
            with_ctx(|ctx| ctx.set_trap_exit(true));
            loop {
                if let Err(RecvError::Closed) = recv().await {
                    break;
                }
            }
        });
        tokio::task::yield_now().await;
        let handle = rt.registry().get_process(pid).unwrap();
        rt.exit(pid, ExitReason::Killed);
        assert_eq!(handle.join().await, ExitReason::Killed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let rt = runtime();
        for _ in 0..5 {
            rt.spawn(|| async {
                std::future::pending::<()>().await;
            });
        }
        // A process that traps exits and ignores them must be killed.
        rt.spawn(|| async {
            with_ctx(|ctx| ctx.set_trap_exit(true));
            (loop {
                let _ = recv().await;
            }) as ()
        });
        tokio::task::yield_now().await;

        let started = tokio::time::Instant::now();
        let report = rt.shutdown(Duration::from_secs(30)).await;
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(report.graceful, 5);
        assert_eq!(report.forced, 1);
        assert_eq!(report.lingering, 0);
        assert!(rt.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_does_not_wait_on_a_blocked_thread() {
        let rt = runtime();
        let (ready_tx, ready_rx) = oneshot::channel();
        rt.spawn(move || async move {
            with_ctx(|ctx| ctx.set_trap_exit(true));
            let _ = ready_tx.send(());
            std::thread::sleep(Duration::from_millis(1500));
        });
        ready_rx.await.unwrap();

        let started = std::time::Instant::now();
        let report = rt.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(
            report,
            ShutdownReport { graceful: 0, forced: 0, lingering: 1 }
        );
    }

    #[tokio::test]
    async fn processes_spawned_during_shutdown_are_counted_once() {
        let rt = runtime();
        let spawner = rt.clone();
        rt.spawn(move || async move {
            with_ctx(|ctx| ctx.set_trap_exit(true));
            let _ = recv().await;
            spawner.spawn(|| std::future::pending::<()>());
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;

        let report = rt.shutdown(Duration::from_millis(50)).await;
        assert_eq!(
            report,
            ShutdownReport { graceful: 0, forced: 2, lingering: 0 }
        );
        assert!(rt.registry().is_empty());
    }
}

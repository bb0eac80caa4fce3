//! Shared state of a running process.
//!
//! The process task owns its [`Mailbox`](super::Mailbox); everything other
//! processes may touch (links, monitors, the trap-exit flag, the kill switch)
//! lives behind a [`ProcessHandle`] stored in the registry.

use super::error::SendError;
use super::mailbox::{Content, MailboxSender, Message};
use crate::core::{ExitReason, Pid, RawTerm, Ref};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// What a caller waiting on a [`Ref`] receives.
#[derive(Debug)]
pub(crate) enum Awaited {
    Reply(RawTerm),
    Down(ExitReason),
}

/// An entry in the awaiting map.
#[derive(Debug)]
enum Waiter {
    Pending(oneshot::Sender<Awaited>),
    /// The call is over but the callee's `Down` may still be in flight; it
    /// is dropped when it arrives.
    Flushing,
}

/// How an exit signal reached a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignalOrigin {
    /// Sent explicitly with `exit`; `Killed` cannot be trapped.
    Exit,
    /// Propagated from a linked process that terminated.
    Link,
}

#[derive(Debug, Default)]
struct ProcessState {
    exiting: bool,
    trap_exit: bool,
    links: HashSet<Pid>,
    /// Monitors this process holds: ref -> monitored pid.
    monitors: HashMap<Ref, Pid>,
    /// Monitors held on this process: ref -> watcher.
    monitored_by: HashMap<Ref, Pid>,
    /// Replies and `Down`s that bypass the mailbox, keyed by call ref.
    awaiting: HashMap<Ref, Waiter>,
}

/// The relationships a terminating process leaves behind.
#[derive(Debug, Default)]
pub(crate) struct Departure {
    pub(crate) links: HashSet<Pid>,
    pub(crate) monitors: HashMap<Ref, Pid>,
    pub(crate) monitored_by: HashMap<Ref, Pid>,
}

/// A cloneable handle to a running process.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Pid,
    sender: MailboxSender,
    state: Arc<RwLock<ProcessState>>,
    kill: Arc<Mutex<Option<oneshot::Sender<ExitReason>>>>,
    exited: Arc<watch::Sender<Option<ExitReason>>>,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Pid, sender: MailboxSender, kill: oneshot::Sender<ExitReason>) -> Self {
        let (exited, _) = watch::channel(None);
        Self {
            pid,
            sender,
            state: Arc::new(RwLock::new(ProcessState::default())),
            kill: Arc::new(Mutex::new(Some(kill))),
            exited: Arc::new(exited),
        }
    }

    /// The process identifier.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether the process has not started terminating.
    pub fn is_alive(&self) -> bool {
        !self.state.read().exiting && !self.sender.is_closed()
    }

    /// Whether exit signals arrive as messages.
    pub fn is_trapping_exits(&self) -> bool {
        self.state.read().trap_exit
    }

    /// Whether the process has terminated and sent all its notifications.
    pub fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    pub(crate) fn set_trap_exit(&self, trap: bool) -> bool {
        std::mem::replace(&mut self.state.write().trap_exit, trap)
    }

    /// Enqueues `message`, unless it answers a call someone is waiting on,
    /// in which case it goes straight to the waiter.
    pub fn deliver(&self, message: Message) -> Result<(), SendError> {
        let Some(message) = self.intercept(message) else {
            return Ok(());
        };
        self.sender
            .send(message)
            .map_err(|message| SendError::NoProc(message.to))
    }

    fn intercept(&self, message: Message) -> Option<Message> {
        let reference = match &message.content {
            Content::Reply { reference, .. } | Content::Down { reference, .. } => *reference,
            _ => return Some(message),
        };

        let mut state = self.state.write();
        let waiter = state.awaiting.remove(&reference);
        match (waiter, message.content) {
            (Some(Waiter::Pending(tx)), Content::Reply { reply, .. }) => {
                // The call monitor's `Down` may follow; swallow it.
                state.awaiting.insert(reference, Waiter::Flushing);
                let _ = tx.send(Awaited::Reply(reply));
                None
            }
            (Some(Waiter::Pending(tx)), Content::Down { reason, .. }) => {
                let _ = tx.send(Awaited::Down(reason));
                None
            }
            (Some(Waiter::Flushing), Content::Reply { reference, .. }) => {
                state.awaiting.insert(reference, Waiter::Flushing);
                tracing::trace!(pid = %self.pid, %reference, "dropping late reply");
                None
            }
            (Some(Waiter::Flushing), Content::Down { reference, .. }) => {
                tracing::trace!(pid = %self.pid, %reference, "flushed call monitor");
                None
            }
            // The caller gave up on this call already.
            (None, Content::Reply { reference, .. }) => {
                tracing::trace!(pid = %self.pid, %reference, "dropping late reply");
                None
            }
            (None, content) => Some(Message::new(message.from, message.to, content)),
            // Only `Reply` and `Down` get past the early return above.
            (Some(_), _) => unreachable!("only replies and downs are intercepted"),
        }
    }

    pub(crate) fn await_ref(&self, reference: Ref) -> Option<oneshot::Receiver<Awaited>> {
        let mut state = self.state.write();
        if state.exiting {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.awaiting.insert(reference, Waiter::Pending(tx));
        Some(rx)
    }

    pub(crate) fn cancel_await(&self, reference: Ref) {
        self.state.write().awaiting.remove(&reference);
    }

    /// Ends the wait on `reference`. With `down_in_flight`, a `Down` for it
    /// is still on its way and is dropped on arrival instead of reaching the
    /// mailbox.
    pub(crate) fn finish_await(&self, reference: Ref, down_in_flight: bool) {
        let mut state = self.state.write();
        if !down_in_flight {
            state.awaiting.remove(&reference);
        } else if let Some(waiter) = state.awaiting.get_mut(&reference) {
            *waiter = Waiter::Flushing;
        }
    }

    /// Records a link to `peer`. Returns `false` once the process is exiting.
    pub(crate) fn add_link(&self, peer: Pid) -> bool {
        let mut state = self.state.write();
        if state.exiting {
            return false;
        }
        state.links.insert(peer);
        true
    }

    pub(crate) fn remove_link(&self, peer: Pid) {
        self.state.write().links.remove(&peer);
    }

    /// Processes linked to this one.
    pub fn links(&self) -> Vec<Pid> {
        self.state.read().links.iter().copied().collect()
    }

    pub(crate) fn add_monitor(&self, reference: Ref, target: Pid) {
        self.state.write().monitors.insert(reference, target);
    }

    pub(crate) fn remove_monitor(&self, reference: Ref) -> Option<Pid> {
        self.state.write().monitors.remove(&reference)
    }

    /// Records that `watcher` monitors this process. Returns `false` once the
    /// process is exiting.
    pub(crate) fn add_monitored_by(&self, reference: Ref, watcher: Pid) -> bool {
        let mut state = self.state.write();
        if state.exiting {
            return false;
        }
        state.monitored_by.insert(reference, watcher);
        true
    }

    /// Forgets the monitor `reference`. Returns `false` if it was already
    /// gone, in which case its `Down` has been or is about to be sent.
    pub(crate) fn remove_monitored_by(&self, reference: Ref) -> bool {
        self.state.write().monitored_by.remove(&reference).is_some()
    }

    /// Applies an exit signal from `from`.
    pub(crate) fn signal(&self, from: Pid, reason: ExitReason, origin: SignalOrigin) {
        if origin == SignalOrigin::Exit && reason.is_killed() {
            self.kill(ExitReason::Killed);
            return;
        }

        if self.is_trapping_exits() {
            let message = Message::new(from, self.pid, Content::Exit(reason));
            let _ = self.deliver(message);
        } else if reason.is_abnormal() {
            self.kill(reason);
        }
    }

    /// Terminates the process with `reason` without running any callbacks.
    pub(crate) fn kill(&self, reason: ExitReason) {
        if let Some(tx) = self.kill.lock().take() {
            let _ = tx.send(reason);
        }
    }

    /// Marks the process as exiting and takes its relationships. Only the
    /// first call gets them.
    pub(crate) fn begin_exit(&self) -> Option<Departure> {
        let mut state = self.state.write();
        if state.exiting {
            return None;
        }
        state.exiting = true;
        state.awaiting.clear();
        self.kill.lock().take();
        Some(Departure {
            links: std::mem::take(&mut state.links),
            monitors: std::mem::take(&mut state.monitors),
            monitored_by: std::mem::take(&mut state.monitored_by),
        })
    }

    pub(crate) fn finish_exit(&self, reason: ExitReason) {
        self.exited.send_replace(Some(reason));
    }

    /// Waits until the process has terminated and all notifications were sent.
    pub async fn join(&self) -> ExitReason {
        let mut rx = self.exited.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ExitReason::NoProc;
            }
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("exiting", &state.exiting)
            .field("trap_exit", &state.trap_exit)
            .field("links", &state.links.len())
            .field("monitors", &state.monitors.len())
            .field("monitored_by", &state.monitored_by.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Term;
    use crate::runtime::Mailbox;

    fn handle(id: u64) -> (ProcessHandle, Mailbox, oneshot::Receiver<ExitReason>) {
        let pid = Pid::from_parts("handle@test", id, 0, 1);
        let (mailbox, sender) = Mailbox::new();
        let (kill_tx, kill_rx) = oneshot::channel();
        (ProcessHandle::new(pid, sender, kill_tx), mailbox, kill_rx)
    }

    #[tokio::test]
    async fn killed_cannot_be_trapped() {
        let (h, mut mailbox, mut kill_rx) = handle(1);
        let from = Pid::from_parts("handle@test", 99, 0, 1);
        h.set_trap_exit(true);

        h.signal(from, ExitReason::error("boom"), SignalOrigin::Link);
        let message = mailbox.try_recv().unwrap().unwrap();
        assert!(matches!(message.content, Content::Exit(ExitReason::Error(_))));
        assert!(kill_rx.try_recv().is_err());

        h.signal(from, ExitReason::Killed, SignalOrigin::Exit);
        assert_eq!(kill_rx.await.unwrap(), ExitReason::Killed);
    }

    #[tokio::test]
    async fn normal_signals_are_ignored_without_trapping() {
        let (h, mut mailbox, mut kill_rx) = handle(2);
        let from = Pid::from_parts("handle@test", 99, 0, 1);

        h.signal(from, ExitReason::Normal, SignalOrigin::Link);
        assert!(mailbox.try_recv().unwrap().is_none());
        assert!(kill_rx.try_recv().is_err());

        h.signal(from, ExitReason::Shutdown, SignalOrigin::Link);
        assert_eq!(kill_rx.await.unwrap(), ExitReason::Shutdown);
    }

    #[tokio::test]
    async fn replies_bypass_the_mailbox() {
        let (h, mut mailbox, _kill) = handle(3);
        let from = Pid::from_parts("handle@test", 7, 0, 1);
        let reference = Ref::new();
        let rx = h.await_ref(reference).unwrap();

        let reply = Content::Reply {
            reference,
            reply: 42u32.encode().unwrap(),
        };
        h.deliver(Message::new(from, h.pid(), reply.clone())).unwrap();
        match rx.await.unwrap() {
            Awaited::Reply(raw) => assert_eq!(raw.decode::<u32>().unwrap(), 42),
            other => panic!("unexpected {other:?}"),
        }

        // A second reply with the same ref is late and dropped.
        h.deliver(Message::new(from, h.pid(), reply)).unwrap();
        assert!(mailbox.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn a_finished_call_flushes_its_down() {
        let (h, mut mailbox, _kill) = handle(5);
        let callee = Pid::from_parts("handle@test", 8, 0, 1);
        let reference = Ref::new();
        let rx = h.await_ref(reference).unwrap();

        let reply = Content::Reply {
            reference,
            reply: 1u32.encode().unwrap(),
        };
        h.deliver(Message::new(callee, h.pid(), reply)).unwrap();
        assert!(matches!(rx.await.unwrap(), Awaited::Reply(_)));
        h.finish_await(reference, true);

        let down = Content::Down {
            reference,
            reason: ExitReason::Normal,
        };
        h.deliver(Message::new(callee, h.pid(), down.clone())).unwrap();
        assert!(mailbox.try_recv().unwrap().is_none());

        // Only the one in-flight `Down` is swallowed.
        h.deliver(Message::new(callee, h.pid(), down)).unwrap();
        assert!(matches!(
            mailbox.try_recv().unwrap().map(|m| m.content),
            Some(Content::Down { .. })
        ));
    }

    #[tokio::test]
    async fn a_finished_call_without_a_pending_down_leaves_nothing_behind() {
        let (h, _mailbox, _kill) = handle(6);
        let reference = Ref::new();
        let _rx = h.await_ref(reference).unwrap();
        h.finish_await(reference, false);
        assert!(h.state.read().awaiting.is_empty());
    }

    #[tokio::test]
    async fn begin_exit_runs_once() {
        let (h, _mailbox, _kill) = handle(4);
        let peer = Pid::from_parts("handle@test", 5, 0, 1);
        assert!(h.add_link(peer));

        let departure = h.begin_exit().unwrap();
        assert!(departure.links.contains(&peer));
        assert!(h.begin_exit().is_none());
        assert!(!h.add_link(peer));
        assert!(!h.is_alive());

        h.finish_exit(ExitReason::Normal);
        assert_eq!(h.join().await, ExitReason::Normal);
    }
}

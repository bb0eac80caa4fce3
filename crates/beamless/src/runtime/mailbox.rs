//! Per-process message queues.
//!
//! A mailbox is an unbounded MPSC channel: any number of senders enqueue
//! [`Message`]s, the owning process dequeues them in arrival order. There is
//! no selective receive; behaviors dispatch on [`Content`] instead.

use super::error::RecvError;
use crate::core::{ExitReason, Pid, RawTerm, Ref};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// A message in flight between two processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The sending process.
    pub from: Pid,
    /// The destination process.
    pub to: Pid,
    /// What is being delivered.
    pub content: Content,
}

impl Message {
    /// A message carrying `content`.
    pub fn new(from: Pid, to: Pid, content: Content) -> Self {
        Self { from, to, content }
    }
}

/// The payload of a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Content {
    /// A plain term sent with `send`.
    Info(RawTerm),

    /// A synchronous request. The reply must carry the same `reference`.
    Call {
        /// Matches the reply to this request.
        reference: Ref,
        /// The encoded request.
        request: RawTerm,
    },

    /// The answer to a [`Content::Call`].
    Reply {
        /// The reference of the call being answered.
        reference: Ref,
        /// The encoded reply.
        reply: RawTerm,
    },

    /// An asynchronous request.
    Cast(RawTerm),

    /// An exit signal delivered as a message to a process trapping exits.
    Exit(ExitReason),

    /// A monitored process terminated. `from` is the process that went down.
    Down {
        /// The monitor that fired.
        reference: Ref,
        /// Why the process terminated.
        reason: ExitReason,
    },

    /// Asks a behavior process to run `terminate` and exit with `reason`.
    Stop(ExitReason),
}

/// The receiving end of a process mailbox, owned by the process.
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    /// Creates a mailbox and the sender that feeds it.
    pub fn new() -> (Self, MailboxSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, MailboxSender { tx })
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Result<Message, RecvError> {
        self.rx.recv().await.ok_or(RecvError::Closed)
    }

    /// Waits at most `duration` for the next message.
    pub async fn recv_timeout(&mut self, duration: Duration) -> Result<Message, RecvError> {
        match tokio::time::timeout(duration, self.rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(RecvError::Closed),
            Err(_) => Err(RecvError::Timeout),
        }
    }

    /// Takes the next message if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<Message>, RecvError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(RecvError::Closed),
        }
    }

    /// Rejects further enqueues and discards whatever is still queued.
    /// Returns the number of discarded messages.
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

/// The sending end of a mailbox. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl MailboxSender {
    /// Enqueues `message`. Never blocks; hands the message back if the
    /// mailbox is closed.
    pub fn send(&self, message: Message) -> Result<(), Message> {
        self.tx.send(message).map_err(|e| e.0)
    }

    /// Whether the mailbox stopped accepting messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

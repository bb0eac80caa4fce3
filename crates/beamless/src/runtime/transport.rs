//! The seam to an inter-node transport.
//!
//! The runtime does not open sockets. Messages to pids owned by another node
//! are handed to the installed [`Transport`]; a transport receiving a message
//! from the wire passes it to
//! [`RuntimeHandle::deliver_incoming`](super::RuntimeHandle::deliver_incoming),
//! which is the same enqueue a local send uses.

use super::mailbox::Message;
use crate::core::{Atom, Pid};

/// Result of handing a message to a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The message was enqueued (or accepted for delivery) on the remote node.
    Delivered,
    /// The remote node has no such process.
    NoSuchProcess,
    /// The remote node could not be reached.
    NodeUnreachable,
}

/// Carries messages to other nodes.
pub trait Transport: Send + Sync + 'static {
    /// The name of the node this transport serves.
    fn local_node_name(&self) -> Atom;

    /// Delivers `message` to `to`, a pid owned by another node.
    fn deliver_remote(&self, to: Pid, message: Message) -> DeliveryOutcome;
}

//! Pid and name lookup for one node.
//!
//! The [`ProcessRegistry`] maps pids to [`ProcessHandle`]s and names to pids.
//! Every operation is atomic per key through `dashmap` entries, so concurrent
//! `register` calls for the same name have exactly one winner.

use super::error::{RegistryError, SendError};
use super::mailbox::Message;
use super::process_handle::ProcessHandle;
use super::transport::{DeliveryOutcome, Transport};
use crate::core::{Atom, Pid};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// The process table and name table of one node.
#[derive(Clone)]
pub struct ProcessRegistry {
    node: Atom,
    processes: Arc<DashMap<Pid, ProcessHandle>>,
    names: Arc<DashMap<String, Pid>>,
    transport: Arc<RwLock<Option<Arc<dyn Transport>>>>,
}

impl ProcessRegistry {
    /// An empty registry for `node`.
    pub fn new(node: Atom) -> Self {
        Self {
            node,
            processes: Arc::new(DashMap::new()),
            names: Arc::new(DashMap::new()),
            transport: Arc::new(RwLock::new(None)),
        }
    }

    /// The node this registry serves.
    pub fn node(&self) -> Atom {
        self.node
    }

    /// Routes messages for other nodes through `transport`.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    /// Whether `pid` belongs to this node.
    pub fn is_local(&self, pid: Pid) -> bool {
        pid.node() == self.node
    }

    pub(crate) fn add_process(&self, handle: ProcessHandle) {
        self.processes.insert(handle.pid(), handle);
    }

    /// The handle of a live process.
    pub fn get_process(&self, pid: Pid) -> Option<ProcessHandle> {
        self.processes.get(&pid).map(|entry| entry.value().clone())
    }

    /// Removes `pid` and releases every name bound to it.
    pub(crate) fn remove_process(&self, pid: Pid) -> Option<ProcessHandle> {
        self.names.retain(|_, holder| *holder != pid);
        self.processes.remove(&pid).map(|(_, handle)| handle)
    }

    /// Whether `pid` is a live process on this node.
    pub fn contains(&self, pid: Pid) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Number of live processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether no process is alive.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Pids of every live process.
    pub fn pids(&self) -> Vec<Pid> {
        self.processes.iter().map(|entry| *entry.key()).collect()
    }

    pub(crate) fn handles(&self) -> Vec<ProcessHandle> {
        self.processes.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Binds `name` to `pid`.
    ///
    /// Registering the same pid twice is a no-op. A name held by a process
    /// that is no longer alive is taken over.
    pub fn register(&self, name: impl Into<String>, pid: Pid) -> Result<(), RegistryError> {
        if !self.contains(pid) {
            return Err(RegistryError::NoProc(pid));
        }

        match self.names.entry(name.into()) {
            Entry::Occupied(mut entry) => {
                let holder = *entry.get();
                if holder == pid {
                    Ok(())
                } else if self.contains(holder) {
                    Err(RegistryError::NameTaken {
                        name: entry.key().clone(),
                        holder,
                    })
                } else {
                    entry.insert(pid);
                    Ok(())
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(pid);
                Ok(())
            }
        }
    }

    /// The pid registered as `name`.
    pub fn whereis(&self, name: &str) -> Option<Pid> {
        self.names.get(name).map(|entry| *entry.value())
    }

    /// Releases `name`, returning the pid it was bound to.
    pub fn unregister(&self, name: &str) -> Option<Pid> {
        self.names.remove(name).map(|(_, pid)| pid)
    }

    /// Every registered name.
    pub fn registered(&self) -> Vec<String> {
        self.names.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Delivers `message` to `message.to`, through the transport if the
    /// destination is remote.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        let to = message.to;
        if self.is_local(to) {
            return match self.get_process(to) {
                Some(handle) => handle.deliver(message),
                None => Err(SendError::NoProc(to)),
            };
        }

        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            return Err(SendError::NodeUnreachable(to.node()));
        };
        match transport.deliver_remote(to, message) {
            DeliveryOutcome::Delivered => Ok(()),
            DeliveryOutcome::NoSuchProcess => Err(SendError::NoProc(to)),
            DeliveryOutcome::NodeUnreachable => Err(SendError::NodeUnreachable(to.node())),
        }
    }

    /// Enqueues a message that arrived from another node.
    pub fn deliver_local(&self, message: Message) -> DeliveryOutcome {
        if !self.is_local(message.to) {
            return DeliveryOutcome::NoSuchProcess;
        }
        match self.get_process(message.to) {
            Some(handle) => match handle.deliver(message) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(_) => DeliveryOutcome::NoSuchProcess,
            },
            None => DeliveryOutcome::NoSuchProcess,
        }
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("node", &self.node)
            .field("processes", &self.processes.len())
            .field("names", &self.names.len())
            .finish()
    }
}

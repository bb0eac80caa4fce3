//! Process identifiers.
//!
//! A [`Pid`] is `{node, id, serial, creation}`. `node` names the owning node,
//! `id` and `serial` count processes spawned by that node incarnation, and
//! `creation` tells incarnations of the same node name apart, so a pid that
//! survived a node restart never matches a process of the new incarnation.

use super::atom::Atom;
use super::term::{RawTerm, Term, TermError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Incarnation counter shared by every runtime in this OS process.
static CREATION: AtomicU32 = AtomicU32::new(1);

/// Returns a creation number no earlier runtime in this OS process used.
pub(crate) fn next_creation() -> u32 {
    CREATION.fetch_add(1, Ordering::Relaxed)
}

/// A process identifier.
///
/// Pids are `Copy`, compare by value and are never reused while the runtime
/// that allocated them is alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid {
    node: Atom,
    id: u64,
    serial: u64,
    creation: u32,
}

impl Pid {
    /// Builds a pid from its parts. Used by transports decoding foreign pids.
    pub fn from_parts(node: impl Into<Atom>, id: u64, serial: u64, creation: u32) -> Self {
        Self {
            node: node.into(),
            id,
            serial,
            creation,
        }
    }

    /// The owning node.
    pub fn node(&self) -> Atom {
        self.node
    }

    /// Process number within the node incarnation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of times the 32-bit `id` space wrapped before this pid.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The node incarnation that allocated this pid.
    pub fn creation(&self) -> u32 {
        self.creation
    }

    /// Encodes this pid as a term.
    pub fn to_term(&self) -> Result<RawTerm, TermError> {
        self.encode()
    }

    /// Decodes a pid previously produced by [`Pid::to_term`].
    pub fn from_term(term: &RawTerm) -> Result<Pid, TermError> {
        Pid::decode(term)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}.{}.{}.{}>",
            self.node, self.id, self.serial, self.creation
        )
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}.{}>", self.node, self.id, self.serial)
    }
}

/// Hands out pids for one node incarnation.
#[derive(Debug)]
pub(crate) struct PidAllocator {
    node: Atom,
    creation: u32,
    next: AtomicU64,
}

const ID_BITS: u32 = 32;

impl PidAllocator {
    pub(crate) fn new(node: Atom, creation: u32) -> Self {
        Self {
            node,
            creation,
            next: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn starting_at(node: Atom, creation: u32, next: u64) -> Self {
        Self {
            node,
            creation,
            next: AtomicU64::new(next),
        }
    }

    pub(crate) fn node(&self) -> Atom {
        self.node
    }

    pub(crate) fn creation(&self) -> u32 {
        self.creation
    }

    pub(crate) fn allocate(&self) -> Pid {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        Pid {
            node: self.node,
            id: n & ((1u64 << ID_BITS) - 1),
            serial: n >> ID_BITS,
            creation: self.creation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn allocated_pids_are_unique() {
        let alloc = PidAllocator::new(Atom::new("alloc@test"), 3);
        let pids: HashSet<Pid> = (0..1000).map(|_| alloc.allocate()).collect();
        assert_eq!(pids.len(), 1000);
        assert!(pids.iter().all(|p| p.creation() == 3));
    }

    #[test]
    fn serial_increments_when_id_wraps() {
        let alloc = PidAllocator::starting_at(Atom::new("wrap@test"), 1, u32::MAX as u64);
        let last = alloc.allocate();
        let wrapped = alloc.allocate();

        assert_eq!((last.id(), last.serial()), (u32::MAX as u64, 0));
        assert_eq!((wrapped.id(), wrapped.serial()), (0, 1));
        assert_ne!(last, wrapped);
    }

    #[test]
    fn creation_separates_incarnations() {
        let first = PidAllocator::new(Atom::new("same@test"), next_creation());
        let second = PidAllocator::new(Atom::new("same@test"), next_creation());
        assert_ne!(first.allocate(), second.allocate());
    }

    #[test]
    fn term_conversion() {
        let pid = Pid::from_parts("remote@host", 17, 2, 9);
        let term = pid.to_term().unwrap();
        assert_eq!(Pid::from_term(&term).unwrap(), pid);
        assert_eq!(pid.to_string(), "<remote@host.17.2>");

        let garbage = RawTerm::from(vec![0xff]);
        assert!(Pid::from_term(&garbage).is_err());
    }
}

//! Interned node names.
//!
//! Every [`Pid`](super::Pid) carries the name of the node that owns it. Storing
//! the name as an [`Atom`] keeps pids `Copy` and makes node comparison a
//! single integer compare.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// An interned string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

struct AtomTable {
    by_name: DashMap<Arc<str>, u32>,
    names: RwLock<Vec<Arc<str>>>,
}

static ATOMS: Lazy<AtomTable> = Lazy::new(|| AtomTable {
    by_name: DashMap::new(),
    names: RwLock::new(Vec::new()),
});

impl AtomTable {
    fn intern(&self, s: &str) -> Atom {
        if let Some(index) = self.by_name.get(s) {
            return Atom(*index);
        }

        let mut names = self.names.write();
        // Another thread may have interned it while we waited for the lock.
        if let Some(index) = self.by_name.get(s) {
            return Atom(*index);
        }

        let name: Arc<str> = Arc::from(s);
        let index = names.len() as u32;
        names.push(name.clone());
        self.by_name.insert(name, index);
        Atom(index)
    }

    fn resolve(&self, atom: Atom) -> Arc<str> {
        self.names
            .read()
            .get(atom.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from(""))
    }
}

impl Atom {
    /// Interns `s`, returning the existing atom if it was seen before.
    pub fn new(s: &str) -> Self {
        ATOMS.intern(s)
    }

    /// The interned string.
    pub fn as_str(&self) -> Arc<str> {
        ATOMS.resolve(*self)
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::new(s)
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::new(&s)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", &*self.as_str())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

// Indices are local to one OS process, so atoms travel as their text.
impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Atom::new(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_the_same_atom() {
        let a = Atom::new("node_a@localhost");
        let b = Atom::from(String::from("node_a@localhost"));
        let c = Atom::new("node_b@localhost");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(&*a.as_str(), "node_a@localhost");
    }

    #[test]
    fn atoms_travel_as_text() {
        let atom = Atom::new("wire@host");
        let bytes = postcard::to_allocvec(&atom).unwrap();
        let text: String = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(text, "wire@host");

        let back: Atom = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, atom);
    }
}

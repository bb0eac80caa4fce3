//! Unique references for monitors and in-flight calls.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_REF: AtomicU64 = AtomicU64::new(1);

/// A unique reference.
///
/// Every monitor and every `call` gets its own `Ref`; `Down` notifications
/// and replies carry it back so the receiver can match them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ref(u64);

impl Ref {
    /// Returns a reference distinct from every other one made in this OS process.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_REF.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Ref<{}>", self.0)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| Ref::new()).collect::<Vec<_>>()))
            .collect();
        let mut all: Vec<Ref> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}

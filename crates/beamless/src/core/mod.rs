//! Identity and data types shared by every part of the runtime.

mod atom;
mod exit_reason;
mod pid;
mod reference;
mod term;

pub use atom::Atom;
pub use exit_reason::ExitReason;
pub use pid::Pid;
pub use reference::Ref;
pub use term::{RawTerm, Term, TermError};

pub(crate) use pid::{next_creation, PidAllocator};

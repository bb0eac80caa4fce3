use crate::core::Pid;
use std::fmt;

/// Addresses a process by pid or by registered name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerRef {
    /// A process identifier.
    Pid(Pid),
    /// A name registered on the local node.
    Name(String),
}

impl From<Pid> for ServerRef {
    fn from(pid: Pid) -> Self {
        ServerRef::Pid(pid)
    }
}

impl From<&Pid> for ServerRef {
    fn from(pid: &Pid) -> Self {
        ServerRef::Pid(*pid)
    }
}

impl From<&str> for ServerRef {
    fn from(name: &str) -> Self {
        ServerRef::Name(name.to_string())
    }
}

impl From<String> for ServerRef {
    fn from(name: String) -> Self {
        ServerRef::Name(name)
    }
}

impl fmt::Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRef::Pid(pid) => write!(f, "{pid}"),
            ServerRef::Name(name) => f.write_str(name),
        }
    }
}

//! Why a process terminated.
//!
//! An [`ExitReason`] travels in exit signals, `Down` notifications and
//! supervisor restart decisions. Three questions are asked of it:
//!
//! - Does a non-trapping linked process die? Yes for everything except
//!   [`ExitReason::Normal`].
//! - Can the receiver trap it? Yes, unless it is [`ExitReason::Killed`] sent
//!   directly with `exit`.
//! - Does a `Transient` child get restarted? Only when the reason is not
//!   [`ExitReason::is_clean`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// The reason a process exited.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    /// The process finished its work.
    #[default]
    Normal,

    /// The process was asked to stop by its supervisor or the node.
    Shutdown,

    /// Like [`ExitReason::Shutdown`], with context.
    ShutdownReason(String),

    /// Unconditional termination.
    Killed,

    /// The target of a link, monitor or call did not exist.
    NoProc,

    /// A supervisor gave up after too many restarts in its time window.
    RestartLimitExceeded,

    /// The process failed, including a panic inside a callback.
    Error(String),
}

impl ExitReason {
    /// `true` only for [`ExitReason::Normal`], the one reason a
    /// non-trapping linked process ignores.
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }

    /// `true` for every reason except [`ExitReason::Normal`].
    pub fn is_abnormal(&self) -> bool {
        !self.is_normal()
    }

    /// `true` for the two shutdown variants.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ExitReason::Shutdown | ExitReason::ShutdownReason(_))
    }

    /// Normal completion or an orderly shutdown. Clean exits are logged at
    /// debug level and do not restart `Transient` children.
    pub fn is_clean(&self) -> bool {
        self.is_normal() || self.is_shutdown()
    }

    /// `true` for [`ExitReason::Killed`].
    pub fn is_killed(&self) -> bool {
        matches!(self, ExitReason::Killed)
    }

    /// An [`ExitReason::Error`] from anything displayable.
    pub fn error(msg: impl fmt::Display) -> Self {
        ExitReason::Error(msg.to_string())
    }

    /// An [`ExitReason::ShutdownReason`] from anything displayable.
    pub fn shutdown(msg: impl fmt::Display) -> Self {
        ExitReason::ShutdownReason(msg.to_string())
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => f.write_str("normal"),
            ExitReason::Shutdown => f.write_str("shutdown"),
            ExitReason::ShutdownReason(r) => write!(f, "{{shutdown, {r}}}"),
            ExitReason::Killed => f.write_str("killed"),
            ExitReason::NoProc => f.write_str("noproc"),
            ExitReason::RestartLimitExceeded => f.write_str("restart_limit_exceeded"),
            ExitReason::Error(e) => write!(f, "{{error, {e}}}"),
        }
    }
}

impl From<()> for ExitReason {
    fn from(_: ()) -> Self {
        ExitReason::Normal
    }
}

impl<E: fmt::Display> From<Result<(), E>> for ExitReason {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ExitReason::Normal,
            Err(e) => ExitReason::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ExitReason::Normal.is_normal());
        assert!(ExitReason::Shutdown.is_abnormal());
        assert!(ExitReason::shutdown("maintenance").is_clean());
        assert!(!ExitReason::NoProc.is_clean());
        assert!(!ExitReason::RestartLimitExceeded.is_clean());
        assert!(ExitReason::Killed.is_killed());
    }

    #[test]
    fn process_bodies_map_to_reasons() {
        assert_eq!(ExitReason::from(()), ExitReason::Normal);
        let failed: Result<(), &str> = Err("disk full");
        assert_eq!(ExitReason::from(failed), ExitReason::Error("disk full".into()));
    }

    #[test]
    fn display() {
        assert_eq!(ExitReason::error("boom").to_string(), "{error, boom}");
        assert_eq!(ExitReason::NoProc.to_string(), "noproc");
    }
}

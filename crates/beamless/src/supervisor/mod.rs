//! Supervision trees.
//!
//! A supervisor is a process that starts child processes, links to them and
//! restarts them when they exit, following its [`Strategy`] and each child's
//! [`RestartType`]. When children fail more than
//! [`SupervisorFlags::max_restarts`] times within
//! [`SupervisorFlags::max_time`], the supervisor shuts the remaining
//! children down and exits with [`ExitReason::RestartLimitExceeded`], so
//! the failure escalates to its own supervisor.
//!
//! [`ExitReason::RestartLimitExceeded`]: crate::ExitReason::RestartLimitExceeded

mod error;
mod restart;
#[allow(clippy::module_inception)]
mod supervisor;
mod types;

pub use crate::behavior::{StartError, StartOpts};
pub use error::{ChildError, StartChildError};
pub use restart::RestartWindow;
pub use supervisor::{
    count_children, delete_child, restart_child, start, start_child, start_dynamic_child,
    start_link, start_opts, stop, terminate_child, which_children, Supervisor,
};
pub use types::{
    ChildCounts, ChildInfo, ChildRef, ChildSpec, ChildStatus, ChildType, RestartType,
    ShutdownType, StartArgs, StartFn, Strategy, SupervisorFlags, SupervisorSpec,
};

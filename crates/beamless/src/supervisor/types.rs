//! Supervisor types and configuration.
//!
//! These types define how supervisors manage their children.

use super::error::StartChildError;
use super::supervisor::{self as sup, Supervisor};
use crate::core::{ExitReason, Pid, RawTerm, Term};
use crate::gen_server::{self, GenServer};
use crate::runtime::RuntimeHandle;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Supervision strategy that determines how child failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Strategy {
    /// If a child process terminates, only that process is restarted.
    #[default]
    OneForOne,
    /// If a child process terminates, all other child processes are
    /// terminated and then all child processes are restarted.
    OneForAll,
    /// If a child process terminates, the terminated process and all
    /// children started after it are terminated and restarted.
    RestForOne,
    /// Like `OneForOne`, for children added at runtime from a single
    /// template with [`start_dynamic_child`](super::start_dynamic_child).
    SimpleOneForOne,
}

/// Determines when a child should be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RestartType {
    /// The child is always restarted, regardless of exit reason.
    #[default]
    Permanent,
    /// The child is restarted only if it terminates with a reason other
    /// than normal or shutdown.
    Transient,
    /// The child is never restarted.
    Temporary,
}

/// Determines how a child should be terminated during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownType {
    /// The child is terminated immediately using an exit signal.
    BrutalKill,
    /// The child is given the specified duration to terminate gracefully.
    Timeout(Duration),
    /// The child can take as long as needed to terminate.
    Infinity,
}

impl Default for ShutdownType {
    fn default() -> Self {
        ShutdownType::Timeout(Duration::from_secs(5))
    }
}

/// The type of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChildType {
    /// A worker process (leaf node in supervision tree).
    #[default]
    Worker,
    /// A supervisor process (internal node in supervision tree).
    Supervisor,
}

/// What a start function gets to work with.
#[derive(Debug, Clone)]
pub struct StartArgs {
    /// The runtime the supervisor lives in.
    pub runtime: RuntimeHandle,
    /// The supervisor. The child must link to it.
    pub supervisor: Pid,
    /// The argument given to `start_dynamic_child`. Always `None` for
    /// static children.
    pub arg: Option<RawTerm>,
}

impl StartArgs {
    /// Decodes the dynamic start argument.
    pub fn decode_arg<T: Term>(&self) -> Result<T, StartChildError> {
        let arg = self
            .arg
            .as_ref()
            .ok_or_else(|| StartChildError::Failed("no start argument".to_string()))?;
        arg.decode()
            .map_err(|e| StartChildError::Failed(format!("bad start argument: {e}")))
    }
}

/// A function that starts a child process linked to the supervisor.
pub type StartFn =
    Arc<dyn Fn(StartArgs) -> BoxFuture<'static, Result<Pid, StartChildError>> + Send + Sync>;

/// Specification for a child process.
///
/// This defines how a child should be started, restarted, and terminated.
#[derive(Clone)]
pub struct ChildSpec {
    /// Unique identifier for this child.
    pub id: String,
    /// Function to start the child. Returns the PID on success.
    pub start: StartFn,
    /// When the child should be restarted.
    pub restart: RestartType,
    /// How the child should be terminated.
    pub shutdown: ShutdownType,
    /// Whether this is a worker or supervisor.
    pub child_type: ChildType,
}

impl std::fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("restart", &self.restart)
            .field("shutdown", &self.shutdown)
            .field("child_type", &self.child_type)
            .finish()
    }
}

impl ChildSpec {
    /// Creates a new child specification with the given ID and start function.
    pub fn new<F, Fut>(id: impl Into<String>, start: F) -> Self
    where
        F: Fn(StartArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Pid, StartChildError>> + Send + 'static,
    {
        Self {
            id: id.into(),
            start: Arc::new(move |args| Box::pin(start(args))),
            restart: RestartType::default(),
            shutdown: ShutdownType::default(),
            child_type: ChildType::default(),
        }
    }

    /// A [`GenServer`] child started with a copy of `arg` each time.
    pub fn for_server<G>(id: impl Into<String>, arg: G::InitArg) -> Self
    where
        G: GenServer,
        G::InitArg: Clone + Sync,
    {
        Self::new(id, move |args: StartArgs| {
            let arg = arg.clone();
            async move {
                Ok(gen_server::start_link::<G>(&args.runtime, args.supervisor, arg).await?)
            }
        })
    }

    /// A [`GenServer`] template for a `SimpleOneForOne` supervisor. Each
    /// instance gets the argument passed to `start_dynamic_child`.
    pub fn server_template<G>(id: impl Into<String>) -> Self
    where
        G: GenServer,
        G::InitArg: Term,
    {
        Self::new(id, |args: StartArgs| async move {
            let arg = args.decode_arg::<G::InitArg>()?;
            Ok(gen_server::start_link::<G>(&args.runtime, args.supervisor, arg).await?)
        })
    }

    /// A nested supervisor child.
    pub fn for_supervisor<S>(id: impl Into<String>, arg: S::InitArg) -> Self
    where
        S: Supervisor,
        S::InitArg: Clone + Sync,
    {
        Self::new(id, move |args: StartArgs| {
            let arg = arg.clone();
            async move { Ok(sup::start_link::<S>(&args.runtime, args.supervisor, arg).await?) }
        })
        .supervisor()
    }

    /// Sets the restart type.
    pub fn restart(mut self, restart: RestartType) -> Self {
        self.restart = restart;
        self
    }

    /// Sets the shutdown type.
    pub fn shutdown(mut self, shutdown: ShutdownType) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Sets the child type.
    pub fn child_type(mut self, child_type: ChildType) -> Self {
        self.child_type = child_type;
        self
    }

    /// Marks this child as a worker.
    pub fn worker(self) -> Self {
        self.child_type(ChildType::Worker)
    }

    /// Marks this child as a supervisor.
    pub fn supervisor(self) -> Self {
        self.child_type(ChildType::Supervisor)
            .shutdown(ShutdownType::Infinity)
    }
}

/// Supervisor initialization flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorFlags {
    /// The supervision strategy.
    pub strategy: Strategy,
    /// Maximum number of restarts allowed in the time period.
    pub max_restarts: u32,
    /// Time period for restart counting.
    pub max_time: Duration,
}

impl Default for SupervisorFlags {
    fn default() -> Self {
        Self {
            strategy: Strategy::OneForOne,
            max_restarts: 3,
            max_time: Duration::from_secs(5),
        }
    }
}

impl SupervisorFlags {
    /// Creates new supervisor flags with the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Sets the maximum restarts.
    pub fn max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = max;
        self
    }

    /// Sets the time period for restart counting.
    pub fn max_time(mut self, period: Duration) -> Self {
        self.max_time = period;
        self
    }
}

/// What [`Supervisor::init`] returns: flags plus the children in start
/// order. A `SimpleOneForOne` supervisor takes exactly one child spec, the
/// template for its dynamic children.
#[derive(Debug, Clone)]
pub struct SupervisorSpec {
    /// Supervisor configuration flags.
    pub flags: SupervisorFlags,
    /// Initial child specifications.
    pub children: Vec<ChildSpec>,
}

impl SupervisorSpec {
    /// Creates a new supervisor spec.
    pub fn new(flags: SupervisorFlags, children: Vec<ChildSpec>) -> Self {
        Self { flags, children }
    }
}

/// Where a child is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildStatus {
    /// Running under the pid in [`ChildInfo::pid`].
    Running,
    /// The last restart attempt failed; it is retried shortly.
    RestartingDelay,
    /// Not running and not going to be restarted: terminated through
    /// `terminate_child`, exited normally as a transient child, or its
    /// start returned `Ignore`.
    Stopped,
}

/// Information about a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildInfo {
    /// The child's identifier. Dynamic children share their template's id.
    pub id: String,
    /// The child's PID, if running.
    pub pid: Option<Pid>,
    /// The child type.
    pub child_type: ChildType,
    /// The restart type.
    pub restart: RestartType,
    /// Lifecycle state.
    pub status: ChildStatus,
}

/// Statistics about supervisor children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildCounts {
    /// Number of child specifications.
    pub specs: usize,
    /// Number of actively running children.
    pub active: usize,
    /// Number of supervisors (subset of active).
    pub supervisors: usize,
    /// Number of workers (subset of active).
    pub workers: usize,
}

/// Names a child for [`terminate_child`](super::terminate_child).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildRef {
    /// A static child by id.
    Id(String),
    /// Any child by its current pid.
    Pid(Pid),
}

impl From<&str> for ChildRef {
    fn from(id: &str) -> Self {
        ChildRef::Id(id.to_string())
    }
}

impl From<String> for ChildRef {
    fn from(id: String) -> Self {
        ChildRef::Id(id)
    }
}

impl From<Pid> for ChildRef {
    fn from(pid: Pid) -> Self {
        ChildRef::Pid(pid)
    }
}

/// Exit reason of a supervisor whose initial child could not be started.
pub(super) fn failed_to_start(id: &str, error: &StartChildError) -> ExitReason {
    ExitReason::shutdown(format!("failed_to_start_child {id}: {error}"))
}

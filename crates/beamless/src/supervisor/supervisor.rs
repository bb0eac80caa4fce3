//! Supervisor implementation.
//!
//! The supervisor is a process that traps exits, starts its children in
//! order and reacts to their exit signals according to its strategy. Every
//! runtime query or change to its children is a call answered by the
//! supervisor process itself, so it never races with a restart.

use super::error::{ChildError, Refusal, StartChildError};
use super::restart::RestartWindow;
use super::types::{
    failed_to_start, ChildCounts, ChildInfo, ChildRef, ChildSpec, ChildStatus, ChildType,
    RestartType, ShutdownType, StartArgs, Strategy, SupervisorSpec,
};
use crate::behavior::{
    classify, guarded, start_process, Dispatch, Info, StartError, StartOpts, Starter,
};
use crate::core::{ExitReason, Pid, RawTerm, Term};
use crate::runtime::{self, CallError, Context, RuntimeHandle, ServerRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The Supervisor trait for implementing supervision trees.
///
/// Supervisors manage child processes and handle their failures according
/// to a configurable strategy.
///
/// # Example
///
/// ```
/// use beamless::supervisor::{ChildSpec, Strategy, Supervisor, SupervisorFlags, SupervisorSpec};
///
/// struct Workers;
///
/// impl Supervisor for Workers {
///     type InitArg = ();
///
///     fn init(_: ()) -> SupervisorSpec {
///         let worker = ChildSpec::new("worker", |args| async move {
///             Ok(args.runtime.spawn_link(args.supervisor, || async {
///                 while beamless::runtime::recv().await.is_ok() {}
///             }))
///         });
///         SupervisorSpec::new(SupervisorFlags::new(Strategy::OneForOne), vec![worker])
///     }
/// }
/// ```
pub trait Supervisor: Sized + Send + 'static {
    /// The type of argument passed to init.
    type InitArg: Send + 'static;

    /// Returns the supervisor flags and child specifications. Runs inside
    /// the supervisor process, before any child is started.
    fn init(arg: Self::InitArg) -> SupervisorSpec;
}

/// Starts an unlinked supervisor. Returns once every child has started.
pub async fn start<S: Supervisor>(
    runtime: &RuntimeHandle,
    arg: S::InitArg,
) -> Result<Pid, StartError> {
    start_opts::<S>(runtime, arg, StartOpts::new()).await
}

/// Starts a supervisor linked to `parent`.
pub async fn start_link<S: Supervisor>(
    runtime: &RuntimeHandle,
    parent: Pid,
    arg: S::InitArg,
) -> Result<Pid, StartError> {
    start_opts::<S>(runtime, arg, StartOpts::new().link(parent)).await
}

/// Starts a supervisor with explicit options.
///
/// If a child fails to start, the children already started are shut down
/// and the result is [`StartError::Stop`] with a shutdown reason naming the
/// child.
pub async fn start_opts<S: Supervisor>(
    runtime: &RuntimeHandle,
    arg: S::InitArg,
    opts: StartOpts,
) -> Result<Pid, StartError> {
    start_process(runtime, opts, move |starter| run::<S>(arg, starter)).await
}

#[derive(Debug, Serialize, Deserialize)]
enum Request {
    /// Add and start the child spec staged under `key`.
    StartChild { key: u64 },
    StartDynamic(RawTerm),
    Terminate(ChildRef),
    Restart(String),
    Delete(String),
    Which,
    Count,
}

#[derive(Debug, Serialize, Deserialize)]
enum Response {
    Started(Option<Pid>),
    Done,
    Children(Vec<ChildInfo>),
    Counts(ChildCounts),
    Refused(Refusal),
}

/// Adds a child to a static supervisor and starts it. Returns `None` if
/// its start returned `Ignore`; the spec is kept.
pub async fn start_child(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
    spec: ChildSpec,
) -> Result<Option<Pid>, ChildError> {
    let key = runtime.stage(Box::new(spec));
    let response = request(runtime, supervisor.into(), Request::StartChild { key }).await;
    // Still staged if the supervisor never picked it up.
    drop(runtime.unstage::<ChildSpec>(key));
    match response? {
        Response::Started(pid) => Ok(pid),
        other => Err(unexpected(other)),
    }
}

/// Starts a new instance of a `SimpleOneForOne` supervisor's template with
/// `arg`. The same argument is used when the instance is restarted.
pub async fn start_dynamic_child<T: Term>(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
    arg: T,
) -> Result<Option<Pid>, ChildError> {
    let arg = arg.encode().map_err(CallError::from)?;
    match request(runtime, supervisor.into(), Request::StartDynamic(arg)).await? {
        Response::Started(pid) => Ok(pid),
        other => Err(unexpected(other)),
    }
}

/// Shuts a child down according to its shutdown type. A static child's
/// spec is kept, unless it is temporary; dynamic children are removed.
pub async fn terminate_child(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
    child: impl Into<ChildRef>,
) -> Result<(), ChildError> {
    request(runtime, supervisor.into(), Request::Terminate(child.into()))
        .await
        .map(drop)
}

/// Starts a stopped static child again. Does not count as a restart.
pub async fn restart_child(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
    id: &str,
) -> Result<Option<Pid>, ChildError> {
    match request(runtime, supervisor.into(), Request::Restart(id.to_string())).await? {
        Response::Started(pid) => Ok(pid),
        other => Err(unexpected(other)),
    }
}

/// Removes the spec of a stopped static child.
pub async fn delete_child(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
    id: &str,
) -> Result<(), ChildError> {
    request(runtime, supervisor.into(), Request::Delete(id.to_string()))
        .await
        .map(drop)
}

/// Lists the children in start order.
pub async fn which_children(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
) -> Result<Vec<ChildInfo>, ChildError> {
    match request(runtime, supervisor.into(), Request::Which).await? {
        Response::Children(children) => Ok(children),
        other => Err(unexpected(other)),
    }
}

/// Counts specs and running children.
pub async fn count_children(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
) -> Result<ChildCounts, ChildError> {
    match request(runtime, supervisor.into(), Request::Count).await? {
        Response::Counts(counts) => Ok(counts),
        other => Err(unexpected(other)),
    }
}

/// Stops the supervisor: its children are shut down in reverse start order,
/// then it exits with `reason`.
pub async fn stop(
    runtime: &RuntimeHandle,
    supervisor: impl Into<ServerRef>,
    reason: ExitReason,
    timeout: Duration,
) -> Result<(), CallError> {
    let pid = runtime.resolve(&supervisor.into())?;
    runtime.request_stop(pid, reason, Some(timeout)).await
}

/// Supervisor calls have no timeout; shutting a child down may take as
/// long as its shutdown type allows.
async fn request(
    runtime: &RuntimeHandle,
    supervisor: ServerRef,
    request: Request,
) -> Result<Response, ChildError> {
    let pid = runtime.resolve(&supervisor).map_err(CallError::from)?;
    let request = request.encode().map_err(CallError::from)?;
    let reply = runtime.call_raw(pid, request, None).await?;
    match reply.decode::<Response>().map_err(CallError::from)? {
        Response::Refused(refusal) => Err(refusal.into()),
        response => Ok(response),
    }
}

fn unexpected(response: Response) -> ChildError {
    CallError::BadTerm(format!("unexpected response {response:?}")).into()
}

/// A child as the supervisor tracks it.
struct Child {
    spec: ChildSpec,
    pid: Option<Pid>,
    /// Start argument of a dynamic child.
    arg: Option<RawTerm>,
    status: ChildStatus,
}

impl Child {
    fn new(spec: ChildSpec, arg: Option<RawTerm>) -> Self {
        Self {
            spec,
            pid: None,
            arg,
            status: ChildStatus::Stopped,
        }
    }

    fn info(&self) -> ChildInfo {
        ChildInfo {
            id: self.spec.id.clone(),
            pid: self.pid,
            child_type: self.spec.child_type,
            restart: self.spec.restart,
            status: self.status,
        }
    }
}

/// Internal supervisor state.
struct SupervisorState {
    ctx: Arc<Context>,
    strategy: Strategy,
    window: RestartWindow,
    /// Children in start order.
    children: Vec<Child>,
    /// The child spec of a `SimpleOneForOne` supervisor.
    template: Option<ChildSpec>,
}

async fn run<S: Supervisor>(arg: S::InitArg, starter: Starter) -> ExitReason {
    let ctx = runtime::context();
    ctx.set_trap_exit(true);

    let spec = match guarded(async move { S::init(arg) }).await {
        Ok(spec) => spec,
        Err(reason) => {
            starter.failed(&ctx, StartError::Stop(reason.clone()));
            return reason;
        }
    };
    let mut state = match SupervisorState::new(ctx.clone(), spec) {
        Ok(state) => state,
        Err(reason) => {
            starter.failed(&ctx, StartError::Stop(reason.clone()));
            return reason;
        }
    };
    if let Err(reason) = state.start_all().await {
        state.terminate_all().await;
        starter.failed(&ctx, StartError::Stop(reason.clone()));
        return reason;
    }
    starter.started();
    tracing::debug!(
        pid = %ctx.pid(),
        strategy = ?state.strategy,
        children = state.children.len(),
        "supervisor started"
    );

    let reason = state.serve().await;
    state.terminate_all().await;
    reason
}

impl SupervisorState {
    fn new(ctx: Arc<Context>, spec: SupervisorSpec) -> Result<Self, ExitReason> {
        let SupervisorSpec { flags, children } = spec;
        let mut state = Self {
            ctx,
            strategy: flags.strategy,
            window: RestartWindow::new(flags.max_restarts, flags.max_time),
            children: Vec::new(),
            template: None,
        };

        if flags.strategy == Strategy::SimpleOneForOne {
            let mut specs = children.into_iter();
            match (specs.next(), specs.next()) {
                (Some(template), None) => state.template = Some(template),
                _ => {
                    return Err(ExitReason::error(
                        "a simple_one_for_one supervisor takes exactly one child spec",
                    ))
                }
            }
        } else {
            for spec in children {
                if state.position(&spec.id).is_some() {
                    return Err(ExitReason::error(format!("duplicate child id {:?}", spec.id)));
                }
                state.children.push(Child::new(spec, None));
            }
        }
        Ok(state)
    }

    fn is_dynamic(&self) -> bool {
        self.template.is_some()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.children.iter().position(|c| c.spec.id == id)
    }

    fn position_of_pid(&self, pid: Pid) -> Option<usize> {
        self.children.iter().position(|c| c.pid == Some(pid))
    }

    async fn start_all(&mut self) -> Result<(), ExitReason> {
        for index in 0..self.children.len() {
            if let Err(error) = self.start_at(index).await {
                let id = &self.children[index].spec.id;
                tracing::error!(supervisor = %self.ctx.pid(), child = %id, %error, "child failed to start");
                return Err(failed_to_start(id, &error));
            }
        }
        Ok(())
    }

    /// Runs the child's start function and links to the result. `None`
    /// means the start returned `Ignore`.
    async fn start_at(&mut self, index: usize) -> Result<Option<Pid>, StartChildError> {
        let child = &self.children[index];
        let args = StartArgs {
            runtime: self.ctx.runtime().clone(),
            supervisor: self.ctx.pid(),
            arg: child.arg.clone(),
        };
        let started = guarded((child.spec.start)(args)).await;

        let child = &mut self.children[index];
        match started {
            Ok(Ok(pid)) => {
                // A child that is already gone shows up as a NoProc exit.
                let _ = self.ctx.link(pid);
                child.pid = Some(pid);
                child.status = ChildStatus::Running;
                tracing::debug!(supervisor = %self.ctx.pid(), child = %child.spec.id, %pid, "child started");
                Ok(Some(pid))
            }
            Ok(Err(error)) if error.is_ignore() => {
                child.pid = None;
                child.status = ChildStatus::Stopped;
                Ok(None)
            }
            Ok(Err(error)) => Err(error),
            Err(reason) => Err(StartChildError::Failed(reason.to_string())),
        }
    }

    async fn serve(&mut self) -> ExitReason {
        let ctx = self.ctx.clone();
        loop {
            let message = if self.has_pending_restart() {
                tokio::task::yield_now().await;
                match ctx.try_recv() {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        if let Some(reason) = self.retry_restart().await {
                            return reason;
                        }
                        continue;
                    }
                    Err(_) => return ExitReason::Normal,
                }
            } else {
                match ctx.recv().await {
                    Ok(message) => message,
                    Err(_) => return ExitReason::Normal,
                }
            };

            match classify(&ctx, message) {
                Dispatch::Stop(reason) => return reason,
                Dispatch::Info(Info::Exit { from, reason }) => {
                    if let Some(reason) = self.child_exited(from, reason).await {
                        return reason;
                    }
                }
                Dispatch::Call { from, request } => {
                    let response = match request.decode::<Request>() {
                        Ok(request) => self.handle_request(request).await,
                        Err(error) => {
                            tracing::warn!(supervisor = %ctx.pid(), caller = %from.caller, %error, "dropping undecodable request");
                            continue;
                        }
                    };
                    let sent = response
                        .encode()
                        .map(|reply| ctx.runtime().reply_raw(from.caller, from.reference, reply));
                    if !matches!(sent, Ok(Ok(()))) {
                        tracing::debug!(supervisor = %ctx.pid(), caller = %from.caller, "reply not delivered");
                    }
                }
                Dispatch::Cast(_) => tracing::warn!(supervisor = %ctx.pid(), "supervisor ignores casts"),
                Dispatch::Info(info) => tracing::debug!(supervisor = %ctx.pid(), ?info, "unexpected message"),
                Dispatch::Ignore => {}
            }
        }
    }

    /// Handles a child's exit signal. Returns the supervisor's own exit
    /// reason if the restart intensity was exceeded.
    async fn child_exited(&mut self, pid: Pid, reason: ExitReason) -> Option<ExitReason> {
        let index = self.position_of_pid(pid)?;
        let supervisor = self.ctx.pid();
        let dynamic = self.is_dynamic();
        let child = &mut self.children[index];
        child.pid = None;
        child.status = ChildStatus::Stopped;

        if reason.is_clean() {
            tracing::debug!(%supervisor, child = %child.spec.id, %pid, %reason, "child exited");
        } else {
            tracing::warn!(%supervisor, child = %child.spec.id, %pid, %reason, "child terminated");
        }

        let restart = match child.spec.restart {
            RestartType::Permanent => true,
            RestartType::Transient => !reason.is_clean(),
            RestartType::Temporary => false,
        };
        if !restart {
            if dynamic || child.spec.restart == RestartType::Temporary {
                self.children.remove(index);
            }
            return None;
        }
        if self.ctx.runtime().is_shutting_down() {
            tracing::debug!(%supervisor, child = %self.children[index].spec.id, "runtime shutting down, not restarting");
            return None;
        }

        if !self.window.record(Instant::now()) {
            tracing::error!(%supervisor, child = %self.children[index].spec.id, "reached max restart intensity, shutting down");
            return Some(ExitReason::RestartLimitExceeded);
        }
        self.restart_group(index).await;
        None
    }

    /// Restarts the failed child at `index` and whatever the strategy takes
    /// down with it.
    async fn restart_group(&mut self, index: usize) {
        let group = match self.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => index..index + 1,
            Strategy::OneForAll => 0..self.children.len(),
            Strategy::RestForOne => index..self.children.len(),
        };
        // Siblings that were stopped on purpose stay stopped.
        let affected: Vec<usize> = group
            .filter(|&i| i == index || self.children[i].status != ChildStatus::Stopped)
            .collect();

        for &i in affected.iter().rev() {
            if i != index {
                self.shut_down(i).await;
            }
        }

        let mut dropped = Vec::new();
        for &i in &affected {
            if i != index && self.children[i].spec.restart == RestartType::Temporary {
                dropped.push(i);
            } else {
                self.restart_at(i).await;
            }
        }
        for i in dropped.into_iter().rev() {
            self.children.remove(i);
        }
    }

    async fn restart_at(&mut self, index: usize) {
        if let Err(error) = self.start_at(index).await {
            let child = &mut self.children[index];
            child.status = ChildStatus::RestartingDelay;
            tracing::warn!(supervisor = %self.ctx.pid(), child = %child.spec.id, %error, "restart failed, will retry");
        }
    }

    fn has_pending_restart(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.status == ChildStatus::RestartingDelay)
    }

    /// Retries one failed restart. Each attempt counts against the restart
    /// intensity.
    async fn retry_restart(&mut self) -> Option<ExitReason> {
        let index = self
            .children
            .iter()
            .position(|c| c.status == ChildStatus::RestartingDelay)?;
        if self.ctx.runtime().is_shutting_down() {
            self.children[index].status = ChildStatus::Stopped;
            return None;
        }
        if !self.window.record(Instant::now()) {
            tracing::error!(supervisor = %self.ctx.pid(), child = %self.children[index].spec.id, "reached max restart intensity, shutting down");
            return Some(ExitReason::RestartLimitExceeded);
        }
        self.restart_at(index).await;
        None
    }

    /// Stops the child at `index` according to its shutdown type and waits
    /// for it to be gone.
    async fn shut_down(&mut self, index: usize) {
        let child = &mut self.children[index];
        child.status = ChildStatus::Stopped;
        let Some(pid) = child.pid.take() else {
            return;
        };
        let (signal, timeout) = match child.spec.shutdown {
            ShutdownType::BrutalKill => (ExitReason::Killed, None),
            ShutdownType::Timeout(timeout) => (ExitReason::Shutdown, Some(timeout)),
            ShutdownType::Infinity => (ExitReason::Shutdown, None),
        };

        // Unlinked first, so its exit does not come back as a message.
        self.ctx.unlink(pid);
        let reason = self
            .ctx
            .runtime()
            .stop_process(self.ctx.handle(), pid, signal, timeout)
            .await;
        tracing::debug!(supervisor = %self.ctx.pid(), child = %self.children[index].spec.id, %pid, %reason, "child shut down");
    }

    /// Shuts every child down in reverse start order.
    async fn terminate_all(&mut self) {
        for index in (0..self.children.len()).rev() {
            self.shut_down(index).await;
        }
    }

    async fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::StartChild { key } => {
                let Some(spec) = self.ctx.runtime().unstage::<ChildSpec>(key) else {
                    return Response::Refused(Refusal::NotFound("<staged spec>".to_string()));
                };
                if self.is_dynamic() {
                    return Response::Refused(Refusal::Unsupported(self.strategy));
                }
                if let Some(index) = self.position(&spec.id) {
                    return Response::Refused(match self.children[index].pid {
                        Some(pid) => Refusal::AlreadyStarted(spec.id, pid),
                        None => Refusal::AlreadyPresent(spec.id),
                    });
                }
                let id = spec.id.clone();
                self.children.push(Child::new(spec, None));
                match self.start_at(self.children.len() - 1).await {
                    Ok(pid) => Response::Started(pid),
                    Err(error) => {
                        self.children.pop();
                        Response::Refused(Refusal::StartFailed(id, error))
                    }
                }
            }
            Request::StartDynamic(arg) => {
                let Some(template) = self.template.clone() else {
                    return Response::Refused(Refusal::Unsupported(self.strategy));
                };
                let id = template.id.clone();
                self.children.push(Child::new(template, Some(arg)));
                match self.start_at(self.children.len() - 1).await {
                    Ok(Some(pid)) => Response::Started(Some(pid)),
                    Ok(None) => {
                        self.children.pop();
                        Response::Started(None)
                    }
                    Err(error) => {
                        self.children.pop();
                        Response::Refused(Refusal::StartFailed(id, error))
                    }
                }
            }
            Request::Terminate(child) => {
                let index = match &child {
                    ChildRef::Id(_) if self.is_dynamic() => {
                        return Response::Refused(Refusal::Unsupported(self.strategy))
                    }
                    ChildRef::Id(id) => self.position(id),
                    ChildRef::Pid(pid) => self.position_of_pid(*pid),
                };
                let Some(index) = index else {
                    return Response::Refused(Refusal::NotFound(match child {
                        ChildRef::Id(id) => id,
                        ChildRef::Pid(pid) => pid.to_string(),
                    }));
                };
                self.shut_down(index).await;
                if self.is_dynamic()
                    || self.children[index].spec.restart == RestartType::Temporary
                {
                    self.children.remove(index);
                }
                Response::Done
            }
            Request::Restart(id) => {
                if self.is_dynamic() {
                    return Response::Refused(Refusal::Unsupported(self.strategy));
                }
                let Some(index) = self.position(&id) else {
                    return Response::Refused(Refusal::NotFound(id));
                };
                if self.children[index].pid.is_some() {
                    return Response::Refused(Refusal::Running(id));
                }
                match self.start_at(index).await {
                    Ok(pid) => Response::Started(pid),
                    Err(error) => Response::Refused(Refusal::StartFailed(id, error)),
                }
            }
            Request::Delete(id) => {
                if self.is_dynamic() {
                    return Response::Refused(Refusal::Unsupported(self.strategy));
                }
                let Some(index) = self.position(&id) else {
                    return Response::Refused(Refusal::NotFound(id));
                };
                if self.children[index].status != ChildStatus::Stopped {
                    return Response::Refused(Refusal::Running(id));
                }
                self.children.remove(index);
                Response::Done
            }
            Request::Which => Response::Children(self.children.iter().map(Child::info).collect()),
            Request::Count => Response::Counts(self.count_children()),
        }
    }

    fn count_children(&self) -> ChildCounts {
        let mut counts = ChildCounts {
            specs: if self.is_dynamic() { 1 } else { self.children.len() },
            ..ChildCounts::default()
        };

        for child in &self.children {
            if child.pid.is_some() {
                counts.active += 1;
                match child.spec.child_type {
                    ChildType::Supervisor => counts.supervisors += 1,
                    ChildType::Worker => counts.workers += 1,
                }
            }
        }

        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen_server::{self, CallResult, From, GenServer, InitResult};
    use crate::runtime::{Content, Message, Runtime};
    use crate::supervisor::SupervisorFlags;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Supervises whatever spec it is given.
    struct Static;

    impl Supervisor for Static {
        type InitArg = SupervisorSpec;

        fn init(spec: SupervisorSpec) -> SupervisorSpec {
            spec
        }
    }

    /// A child that exits with whatever `ExitReason` it is sent.
    fn obedient(id: &str) -> ChildSpec {
        ChildSpec::new(id, |args: StartArgs| async move {
            Ok(args.runtime.spawn_link(args.supervisor, || async {
                loop {
                    match runtime::recv().await {
                        Ok(Message {
                            content: Content::Info(term),
                            ..
                        }) => {
                            if let Ok(reason) = term.decode::<ExitReason>() {
                                return reason;
                            }
                        }
                        Ok(_) => {}
                        Err(_) => return ExitReason::Normal,
                    }
                }
            }))
        })
    }

    struct Tagged;

    #[async_trait]
    impl GenServer for Tagged {
        type State = String;
        type InitArg = String;
        type Call = ();
        type Cast = ();
        type Reply = String;

        async fn init(tag: String) -> InitResult<String> {
            InitResult::ok(tag)
        }

        async fn handle_call(_: (), _from: From, tag: &mut String) -> CallResult<String> {
            CallResult::reply(tag.clone())
        }
    }

    fn rt() -> RuntimeHandle {
        Runtime::new("supervisor@test").handle()
    }

    fn flags(strategy: Strategy) -> SupervisorFlags {
        SupervisorFlags::new(strategy)
            .max_restarts(3)
            .max_time(Duration::from_secs(10))
    }

    async fn child_pid(rt: &RuntimeHandle, sup: Pid, id: &str) -> Option<Pid> {
        which_children(rt, sup)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.id == id)
            .and_then(|c| c.pid)
    }

    async fn restarted(rt: &RuntimeHandle, sup: Pid, id: &str, old: Pid) -> Pid {
        for _ in 0..200 {
            match child_pid(rt, sup, id).await {
                Some(pid) if pid != old => return pid,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        panic!("child {id} was not restarted");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_for_all_restarts_every_child() {
        let rt = rt();
        let children = vec![obedient("a"), obedient("b")];
        let spec = SupervisorSpec::new(flags(Strategy::OneForAll), children);
        let sup = start::<Static>(&rt, spec).await.unwrap();
        let a = child_pid(&rt, sup, "a").await.unwrap();
        let b = child_pid(&rt, sup, "b").await.unwrap();

        rt.exit(b, ExitReason::error("boom"));
        restarted(&rt, sup, "b", b).await;

        let new_a = child_pid(&rt, sup, "a").await.unwrap();
        assert_ne!(new_a, a);
        assert!(!rt.is_alive(a));
        assert!(rt.is_alive(new_a));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn transient_and_temporary_children_are_not_restarted() {
        let rt = rt();
        let children = vec![
            obedient("transient").restart(RestartType::Transient),
            obedient("temporary").restart(RestartType::Temporary),
        ];
        let sup = start::<Static>(&rt, SupervisorSpec::new(flags(Strategy::OneForOne), children))
            .await
            .unwrap();

        let transient = child_pid(&rt, sup, "transient").await.unwrap();
        let temporary = child_pid(&rt, sup, "temporary").await.unwrap();
        rt.send(transient, &ExitReason::Normal).unwrap();
        rt.send(temporary, &ExitReason::error("crash")).unwrap();
        rt.join(transient).await;
        rt.join(temporary).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let children = which_children(&rt, sup).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "transient");
        assert_eq!(children[0].status, ChildStatus::Stopped);
        assert_eq!(children[0].pid, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exceeding_the_intensity_stops_the_supervisor() {
        let rt = rt();
        let flags = SupervisorFlags::new(Strategy::OneForOne)
            .max_restarts(1)
            .max_time(Duration::from_secs(10));
        let spec = SupervisorSpec::new(flags, vec![obedient("a"), obedient("b")]);
        let sup = start::<Static>(&rt, spec).await.unwrap();
        let handle = rt.registry().get_process(sup).unwrap();
        let b = child_pid(&rt, sup, "b").await.unwrap();

        let a = child_pid(&rt, sup, "a").await.unwrap();
        rt.exit(a, ExitReason::error("first"));
        let a = restarted(&rt, sup, "a", a).await;
        rt.exit(a, ExitReason::error("second"));

        assert_eq!(handle.join().await, ExitReason::RestartLimitExceeded);
        assert!(!rt.is_alive(b));
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_outside_the_window_are_forgotten() {
        let rt = rt();
        let flags = SupervisorFlags::new(Strategy::OneForOne)
            .max_restarts(1)
            .max_time(Duration::from_secs(5));
        let sup = start::<Static>(&rt, SupervisorSpec::new(flags, vec![obedient("a")]))
            .await
            .unwrap();

        let a = child_pid(&rt, sup, "a").await.unwrap();
        rt.exit(a, ExitReason::error("first"));
        let a = restarted(&rt, sup, "a", a).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        rt.exit(a, ExitReason::error("second"));
        restarted(&rt, sup, "a", a).await;

        assert!(rt.is_alive(sup));
    }

    #[tokio::test]
    async fn children_are_not_restarted_while_the_runtime_shuts_down() {
        let rt = rt();
        let spec = SupervisorSpec::new(flags(Strategy::OneForOne), vec![obedient("a")]);
        let sup = start::<Static>(&rt, spec).await.unwrap();
        let a = child_pid(&rt, sup, "a").await.unwrap();

        rt.mark_shutting_down();
        rt.exit(a, ExitReason::error("boom"));
        rt.join(a).await;

        let children = which_children(&rt, sup).await.unwrap();
        assert_eq!(children[0].pid, None);
        assert_eq!(children[0].status, ChildStatus::Stopped);
        assert!(rt.is_alive(sup));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_restarts_are_retried_until_the_limit() {
        let rt = rt();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let flaky = ChildSpec::new("flaky", move |args: StartArgs| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt > 0 {
                    return Err(StartChildError::Failed("no luck".into()));
                }
                Ok(args.runtime.spawn_link(args.supervisor, || async {
                    while runtime::recv().await.is_ok() {}
                }))
            }
        });
        let sup = start::<Static>(&rt, SupervisorSpec::new(flags(Strategy::OneForOne), vec![flaky]))
            .await
            .unwrap();
        let handle = rt.registry().get_process(sup).unwrap();

        let pid = child_pid(&rt, sup, "flaky").await.unwrap();
        rt.exit(pid, ExitReason::error("boom"));

        assert_eq!(handle.join().await, ExitReason::RestartLimitExceeded);
        // The initial start, then three failed restarts.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn a_failing_initial_child_fails_the_start() {
        let rt = rt();
        let broken = ChildSpec::new("broken", |_args: StartArgs| async {
            Err(StartChildError::Failed("nope".into()))
        });
        let spec = SupervisorSpec::new(flags(Strategy::OneForOne), vec![obedient("ok"), broken]);

        match start::<Static>(&rt, spec).await {
            Err(StartError::Stop(ExitReason::ShutdownReason(reason))) => {
                assert!(reason.contains("broken"), "{reason}");
            }
            other => panic!("expected a failed start, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dynamic_children_restart_with_their_argument() {
        let rt = rt();
        let spec = SupervisorSpec::new(
            flags(Strategy::SimpleOneForOne),
            vec![ChildSpec::server_template::<Tagged>("tagged")],
        );
        let sup = start::<Static>(&rt, spec).await.unwrap();

        let alpha = start_dynamic_child(&rt, sup, "alpha".to_string()).await.unwrap().unwrap();
        start_dynamic_child(&rt, sup, "beta".to_string()).await.unwrap().unwrap();
        let t = Duration::from_secs(1);
        assert_eq!(gen_server::call::<Tagged>(&rt, alpha, (), t).await.unwrap(), "alpha");

        rt.exit(alpha, ExitReason::error("boom"));
        rt.join(alpha).await;
        let mut fresh = None;
        for _ in 0..200 {
            let pids: Vec<Pid> = which_children(&rt, sup)
                .await
                .unwrap()
                .into_iter()
                .filter_map(|c| c.pid)
                .collect();
            if pids.len() == 2 && !pids.contains(&alpha) {
                fresh = Some(pids);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let pids = fresh.expect("dynamic child was not restarted");
        let mut tags = Vec::new();
        for pid in pids {
            tags.push(gen_server::call::<Tagged>(&rt, pid, (), t).await.unwrap());
        }
        tags.sort();
        assert_eq!(tags, ["alpha", "beta"]);

        let counts = count_children(&rt, sup).await.unwrap();
        assert_eq!((counts.specs, counts.active, counts.workers), (1, 2, 2));
        assert!(matches!(
            restart_child(&rt, sup, "tagged").await,
            Err(ChildError::Unsupported(Strategy::SimpleOneForOne))
        ));
    }

    #[tokio::test]
    async fn child_management_calls() {
        let rt = rt();
        let spec = SupervisorSpec::new(flags(Strategy::OneForOne), vec![obedient("a")]);
        let sup = start::<Static>(&rt, spec).await.unwrap();

        let b = start_child(&rt, sup, obedient("b")).await.unwrap().unwrap();
        assert!(matches!(
            start_child(&rt, sup, obedient("b")).await,
            Err(ChildError::AlreadyStarted(id, pid)) if id == "b" && pid == b
        ));

        assert!(matches!(delete_child(&rt, sup, "b").await, Err(ChildError::Running(_))));
        terminate_child(&rt, sup, "b").await.unwrap();
        assert!(!rt.is_alive(b));
        assert!(matches!(
            start_child(&rt, sup, obedient("b")).await,
            Err(ChildError::AlreadyPresent(_))
        ));

        let b2 = restart_child(&rt, sup, "b").await.unwrap().unwrap();
        assert_ne!(b2, b);
        assert!(matches!(restart_child(&rt, sup, "b").await, Err(ChildError::Running(_))));

        terminate_child(&rt, sup, b2).await.unwrap();
        delete_child(&rt, sup, "b").await.unwrap();
        assert!(matches!(delete_child(&rt, sup, "b").await, Err(ChildError::NotFound(_))));

        let counts = count_children(&rt, sup).await.unwrap();
        assert_eq!((counts.specs, counts.active), (1, 1));
        assert!(matches!(
            start_dynamic_child(&rt, sup, 1u8).await,
            Err(ChildError::Unsupported(Strategy::OneForOne))
        ));
    }

    #[tokio::test]
    async fn stopping_shuts_children_down_in_reverse_order() {
        let rt = rt();
        let spec = SupervisorSpec::new(
            flags(Strategy::OneForOne),
            vec![obedient("first"), obedient("second").shutdown(ShutdownType::BrutalKill)],
        );
        let sup = start::<Static>(&rt, spec).await.unwrap();
        let first = child_pid(&rt, sup, "first").await.unwrap();
        let second = child_pid(&rt, sup, "second").await.unwrap();
        let first = rt.registry().get_process(first).unwrap();
        let second = rt.registry().get_process(second).unwrap();

        stop(&rt, sup, ExitReason::Shutdown, Duration::from_secs(1)).await.unwrap();

        assert_eq!(second.join().await, ExitReason::Killed);
        assert_eq!(first.join().await, ExitReason::Shutdown);
        assert!(rt.registry().is_empty());
    }
}

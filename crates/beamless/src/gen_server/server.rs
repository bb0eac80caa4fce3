//! The [`GenServer`] trait, its process loop and the client functions.

use super::types::{CallResult, CastResult, InfoResult, InitResult};
use crate::behavior::{
    classify, guarded, run_terminate, start_process, Dispatch, From, Info, StartError, StartOpts,
    Starter,
};
use crate::core::{ExitReason, Pid, Term};
use crate::runtime::{self, CallError, Content, Context, RuntimeHandle, SendError, ServerRef};
use async_trait::async_trait;
use std::time::Duration;

/// Default timeout of [`call`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// A request/response server.
///
/// Callbacks run one at a time inside the server process and mutate the
/// state in place. A panic in any callback stops the server with
/// [`ExitReason::Error`] after `terminate` has run.
///
/// ```
/// use async_trait::async_trait;
/// use beamless::gen_server::{CallResult, CastResult, From, GenServer, InitResult};
/// use serde::{Deserialize, Serialize};
///
/// struct Counter;
///
/// #[derive(Serialize, Deserialize)]
/// enum Request { Get, Add(i64) }
///
/// #[async_trait]
/// impl GenServer for Counter {
///     type State = i64;
///     type InitArg = i64;
///     type Call = Request;
///     type Cast = ();
///     type Reply = i64;
///
///     async fn init(start: i64) -> InitResult<i64> {
///         InitResult::ok(start)
///     }
///
///     async fn handle_call(request: Request, _from: From, count: &mut i64) -> CallResult<i64> {
///         if let Request::Add(n) = request {
///             *count += n;
///         }
///         CallResult::reply(*count)
///     }
///
///     async fn handle_cast(_: (), count: &mut i64) -> CastResult {
///         *count = 0;
///         CastResult::NoReply
///     }
/// }
/// ```
#[async_trait]
pub trait GenServer: Sized + Send + Sync + 'static {
    /// The server's state.
    type State: Send + 'static;
    /// Argument of `init`.
    type InitArg: Send + 'static;
    /// Requests accepted by `handle_call`.
    type Call: Term;
    /// Messages accepted by `handle_cast`.
    type Cast: Term;
    /// Replies to calls.
    type Reply: Term;

    /// Builds the initial state. The starting caller waits for this.
    async fn init(arg: Self::InitArg) -> InitResult<Self::State>;

    /// Handles a synchronous request.
    async fn handle_call(
        request: Self::Call,
        from: From,
        state: &mut Self::State,
    ) -> CallResult<Self::Reply>;

    /// Handles an asynchronous request.
    async fn handle_cast(_msg: Self::Cast, _state: &mut Self::State) -> CastResult {
        CastResult::NoReply
    }

    /// Handles everything else: plain messages, trapped exits of processes
    /// other than the parent, and monitor notifications.
    async fn handle_info(info: Info, _state: &mut Self::State) -> InfoResult {
        tracing::debug!(?info, "unhandled info message");
        CastResult::NoReply
    }

    /// Runs once before the server exits for any reason other than being
    /// killed. Panics here are logged and do not change the exit reason.
    async fn terminate(_reason: &ExitReason, _state: &mut Self::State) {}
}

/// Starts an unlinked server.
pub async fn start<G: GenServer>(
    runtime: &RuntimeHandle,
    arg: G::InitArg,
) -> Result<Pid, StartError> {
    start_opts::<G>(runtime, arg, StartOpts::new()).await
}

/// Starts a server linked to `parent`.
pub async fn start_link<G: GenServer>(
    runtime: &RuntimeHandle,
    parent: Pid,
    arg: G::InitArg,
) -> Result<Pid, StartError> {
    start_opts::<G>(runtime, arg, StartOpts::new().link(parent)).await
}

/// Starts a server with explicit options. Returns once `init` has finished.
pub async fn start_opts<G: GenServer>(
    runtime: &RuntimeHandle,
    arg: G::InitArg,
    opts: StartOpts,
) -> Result<Pid, StartError> {
    start_process(runtime, opts, move |starter| run::<G>(arg, starter)).await
}

async fn run<G: GenServer>(arg: G::InitArg, starter: Starter) -> ExitReason {
    let ctx = runtime::context();
    let pid = ctx.pid();

    let mut state = match guarded(G::init(arg)).await {
        Ok(InitResult::Ok(state)) => {
            starter.started();
            state
        }
        Ok(InitResult::Ignore) => {
            starter.failed(&ctx, StartError::Ignore);
            return ExitReason::Normal;
        }
        Ok(InitResult::Stop(reason)) | Err(reason) => {
            starter.failed(&ctx, StartError::Stop(reason.clone()));
            return reason;
        }
    };
    tracing::debug!(%pid, server = std::any::type_name::<G>(), "server started");

    let (reason, last_reply) = serve::<G>(&ctx, &mut state).await;
    run_terminate(pid, &reason, G::terminate(&reason, &mut state)).await;
    if let Some((from, reply)) = last_reply {
        send_reply(ctx.runtime(), &from, &reply);
    }
    reason
}

type PendingReply<G> = Option<(From, <G as GenServer>::Reply)>;

async fn serve<G: GenServer>(ctx: &Context, state: &mut G::State) -> (ExitReason, PendingReply<G>) {
    let pid = ctx.pid();
    loop {
        let Ok(message) = ctx.recv().await else {
            return (ExitReason::Normal, None);
        };

        match classify(ctx, message) {
            Dispatch::Call { from, request } => {
                let request = match request.decode::<G::Call>() {
                    Ok(request) => request,
                    Err(error) => {
                        tracing::warn!(%pid, caller = %from.caller, %error, "dropping undecodable call");
                        continue;
                    }
                };
                tracing::trace!(%pid, caller = %from.caller, "handle_call");
                match guarded(G::handle_call(request, from, state)).await {
                    Ok(CallResult::Reply(reply)) => send_reply(ctx.runtime(), &from, &reply),
                    Ok(CallResult::NoReply) => {}
                    Ok(CallResult::Stop(reason)) | Err(reason) => return (reason, None),
                    Ok(CallResult::StopReply(reason, reply)) => {
                        return (reason, Some((from, reply)));
                    }
                }
            }
            Dispatch::Cast(msg) => {
                let msg = match msg.decode::<G::Cast>() {
                    Ok(msg) => msg,
                    Err(error) => {
                        tracing::warn!(%pid, %error, "dropping undecodable cast");
                        continue;
                    }
                };
                tracing::trace!(%pid, "handle_cast");
                match guarded(G::handle_cast(msg, state)).await {
                    Ok(CastResult::NoReply) => {}
                    Ok(CastResult::Stop(reason)) | Err(reason) => return (reason, None),
                }
            }
            Dispatch::Info(info) => {
                tracing::trace!(%pid, "handle_info");
                match guarded(G::handle_info(info, state)).await {
                    Ok(CastResult::NoReply) => {}
                    Ok(CastResult::Stop(reason)) | Err(reason) => return (reason, None),
                }
            }
            Dispatch::Stop(reason) => return (reason, None),
            Dispatch::Ignore => {}
        }
    }
}

fn send_reply<R: Term>(runtime: &RuntimeHandle, from: &From, reply: &R) {
    if let Err(error) = reply_with(runtime, from, reply) {
        tracing::debug!(caller = %from.caller, %error, "reply not delivered");
    }
}

fn reply_with<R: Term>(runtime: &RuntimeHandle, from: &From, reply: &R) -> Result<(), SendError> {
    runtime.reply_raw(from.caller, from.reference, reply.encode()?)
}

/// Sends `request` to `server` and waits up to `timeout` for the reply.
///
/// On [`CallError::Timeout`] the server is left running; a reply that
/// arrives later is discarded.
pub async fn call<G: GenServer>(
    runtime: &RuntimeHandle,
    server: impl Into<ServerRef>,
    request: G::Call,
    timeout: Duration,
) -> Result<G::Reply, CallError> {
    call_inner::<G>(runtime, server.into(), request, Some(timeout)).await
}

/// Like [`call`], without a timeout. Still returns if the server dies.
pub async fn call_infinity<G: GenServer>(
    runtime: &RuntimeHandle,
    server: impl Into<ServerRef>,
    request: G::Call,
) -> Result<G::Reply, CallError> {
    call_inner::<G>(runtime, server.into(), request, None).await
}

async fn call_inner<G: GenServer>(
    runtime: &RuntimeHandle,
    server: ServerRef,
    request: G::Call,
    timeout: Option<Duration>,
) -> Result<G::Reply, CallError> {
    let pid = runtime.resolve(&server)?;
    let request = request.encode()?;
    let reply = runtime.call_raw(pid, request, timeout).await?;
    Ok(reply.decode::<G::Reply>()?)
}

/// Sends `msg` to `server` without waiting.
pub fn cast<G: GenServer>(
    runtime: &RuntimeHandle,
    server: impl Into<ServerRef>,
    msg: G::Cast,
) -> Result<(), SendError> {
    let pid = runtime.resolve(&server.into())?;
    runtime.send_content(pid, Content::Cast(msg.encode()?))
}

/// Answers a call that `handle_call` deferred with [`CallResult::NoReply`].
pub fn reply<R: Term>(runtime: &RuntimeHandle, from: &From, reply: &R) -> Result<(), SendError> {
    reply_with(runtime, from, reply)
}

/// Stops `server` with `reason`, waiting up to `timeout` for it to finish
/// `terminate` and exit.
pub async fn stop(
    runtime: &RuntimeHandle,
    server: impl Into<ServerRef>,
    reason: ExitReason,
    timeout: Duration,
) -> Result<(), CallError> {
    let pid = runtime.resolve(&server.into())?;
    runtime.request_stop(pid, reason, Some(timeout)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize)]
    enum Req {
        Get,
        Add(i64),
        Sleep(u64),
        Defer,
        Release,
        Crash,
        StopWith(i64),
    }

    struct Counter;

    struct CounterState {
        count: i64,
        deferred: Vec<From>,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GenServer for Counter {
        type State = CounterState;
        type InitArg = (i64, Arc<AtomicUsize>);
        type Call = Req;
        type Cast = i64;
        type Reply = i64;

        async fn init((count, terminated): Self::InitArg) -> InitResult<CounterState> {
            match count {
                -1 => InitResult::Ignore,
                n if n < -1 => InitResult::stop(ExitReason::error("negative start")),
                count => InitResult::ok(CounterState {
                    count,
                    deferred: Vec::new(),
                    terminated,
                }),
            }
        }

        async fn handle_call(
            request: Req,
            from: From,
            state: &mut CounterState,
        ) -> CallResult<i64> {
            match request {
                Req::Get => CallResult::reply(state.count),
                Req::Add(n) => {
                    state.count += n;
                    CallResult::reply(state.count)
                }
                Req::Sleep(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    CallResult::reply(state.count)
                }
                Req::Defer => {
                    state.deferred.push(from);
                    CallResult::noreply()
                }
                Req::Release => {
                    let rt = runtime::with_ctx(|ctx| ctx.runtime().clone());
                    for waiting in state.deferred.drain(..) {
                        reply(&rt, &waiting, &state.count).unwrap();
                    }
                    CallResult::reply(0)
                }
                Req::Crash => panic!("bad request"),
                Req::StopWith(n) => CallResult::stop(ExitReason::shutdown("asked"), n),
            }
        }

        async fn handle_cast(n: i64, state: &mut CounterState) -> CastResult {
            state.count += n;
            CastResult::NoReply
        }

        async fn terminate(_reason: &ExitReason, state: &mut CounterState) {
            state.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn runtime() -> RuntimeHandle {
        Runtime::new("gen_server@test").handle()
    }

    #[tokio::test]
    async fn call_and_cast() {
        let rt = runtime();
        let pid = start::<Counter>(&rt, (10, Arc::default())).await.unwrap();

        assert_eq!(call::<Counter>(&rt, pid, Req::Add(5), DEFAULT_CALL_TIMEOUT).await, Ok(15));
        cast::<Counter>(&rt, pid, 5).unwrap();
        assert_eq!(call::<Counter>(&rt, pid, Req::Get, DEFAULT_CALL_TIMEOUT).await, Ok(20));
    }

    #[tokio::test]
    async fn calls_by_name() {
        let rt = runtime();
        let opts = StartOpts::new().name("counter");
        let pid = start_opts::<Counter>(&rt, (1, Arc::default()), opts.clone()).await.unwrap();

        assert_eq!(call_infinity::<Counter>(&rt, "counter", Req::Get).await, Ok(1));
        assert_eq!(
            start_opts::<Counter>(&rt, (2, Arc::default()), opts).await,
            Err(StartError::AlreadyStarted(pid))
        );
        assert_eq!(
            call::<Counter>(&rt, "nobody", Req::Get, DEFAULT_CALL_TIMEOUT).await,
            Err(CallError::NotRegistered("nobody".into()))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn call_timeout_leaves_server_alive() {
        let rt = runtime();
        let pid = start::<Counter>(&rt, (3, Arc::default())).await.unwrap();

        let slow = call::<Counter>(&rt, pid, Req::Sleep(200), Duration::from_millis(20)).await;
        assert_eq!(slow, Err(CallError::Timeout));
        assert!(rt.is_alive(pid));
        assert_eq!(call::<Counter>(&rt, pid, Req::Get, DEFAULT_CALL_TIMEOUT).await, Ok(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deferred_replies() {
        let rt = runtime();
        let pid = start::<Counter>(&rt, (7, Arc::default())).await.unwrap();

        let waiter = {
            let rt = rt.clone();
            tokio::spawn(async move { call_infinity::<Counter>(&rt, pid, Req::Defer).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(call::<Counter>(&rt, pid, Req::Release, DEFAULT_CALL_TIMEOUT).await, Ok(0));
        assert_eq!(waiter.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn panic_in_handler_stops_the_server_after_terminate() {
        let rt = runtime();
        let terminated = Arc::new(AtomicUsize::new(0));
        let pid = start::<Counter>(&rt, (0, terminated.clone())).await.unwrap();

        let result = call::<Counter>(&rt, pid, Req::Crash, DEFAULT_CALL_TIMEOUT).await;
        assert_eq!(
            result,
            Err(CallError::LinkedExit(ExitReason::error("bad request")))
        );
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert!(!rt.is_alive(pid));
    }

    #[tokio::test]
    async fn stop_reply_answers_after_terminate() {
        let rt = runtime();
        let terminated = Arc::new(AtomicUsize::new(0));
        let pid = start::<Counter>(&rt, (0, terminated.clone())).await.unwrap();

        assert_eq!(call::<Counter>(&rt, pid, Req::StopWith(9), DEFAULT_CALL_TIMEOUT).await, Ok(9));
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_reply_leaves_no_down_in_the_callers_mailbox() {
        let rt = runtime();
        let server = start::<Counter>(&rt, (0, Arc::default())).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let client = rt.clone();
        rt.spawn(move || async move {
            let reply =
                call::<Counter>(&client, server, Req::StopWith(9), DEFAULT_CALL_TIMEOUT).await;
            client.join(server).await;
            let stray = runtime::recv_timeout(Duration::from_millis(100))
                .await
                .ok()
                .map(|m| m.content);
            let _ = tx.send((reply, stray));
        });

        let (reply, stray) = rx.await.unwrap();
        assert_eq!(reply, Ok(9));
        assert!(stray.is_none(), "unexpected message {stray:?}");
    }

    #[tokio::test]
    async fn stop_runs_terminate() {
        let rt = runtime();
        let terminated = Arc::new(AtomicUsize::new(0));
        let pid = start::<Counter>(&rt, (0, terminated.clone())).await.unwrap();

        stop(&rt, pid, ExitReason::Normal, Duration::from_secs(1)).await.unwrap();
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert_eq!(
            stop(&rt, pid, ExitReason::Normal, Duration::from_secs(1)).await,
            Err(CallError::NoProc(pid))
        );
    }

    #[tokio::test]
    async fn init_can_refuse() {
        let rt = runtime();
        assert_eq!(
            start::<Counter>(&rt, (-1, Arc::default())).await,
            Err(StartError::Ignore)
        );
        assert_eq!(
            start::<Counter>(&rt, (-5, Arc::default())).await,
            Err(StartError::Stop(ExitReason::error("negative start")))
        );
        assert!(rt.registry().is_empty());
    }
}

//! The event manager process and its client handle.

use super::error::{EventError, Refusal};
use super::handler::{EventHandler, HandlerReply, HandlerResult};
use crate::behavior::{
    classify, guarded, run_terminate, start_process, Dispatch, Info, StartError, StartOpts,
    Starter,
};
use crate::core::{ExitReason, Pid, RawTerm, Term};
use crate::gen_server::DEFAULT_CALL_TIMEOUT;
use crate::runtime::{self, CallError, Content, Context, RuntimeHandle};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

type BoxedHandler<E> = Box<dyn EventHandler<E>>;

#[derive(Debug, Serialize, Deserialize)]
enum Request {
    /// Install the handler staged under `key`.
    Add { id: String, key: u64 },
    Delete(String),
    Which,
    SyncNotify(RawTerm),
    Call { id: String, request: RawTerm },
}

#[derive(Debug, Serialize, Deserialize)]
enum Response {
    Done,
    Handlers(Vec<String>),
    Reply(RawTerm),
    Refused(Refusal),
}

/// A handle to an event manager process dispatching events of type `E`.
pub struct EventManager<E> {
    pid: Pid,
    runtime: RuntimeHandle,
    timeout: Duration,
    _event: PhantomData<fn(E)>,
}

impl<E> Clone for EventManager<E> {
    fn clone(&self) -> Self {
        Self {
            pid: self.pid,
            runtime: self.runtime.clone(),
            timeout: self.timeout,
            _event: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for EventManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("pid", &self.pid)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<E: Term> EventManager<E> {
    /// Starts an unlinked manager with no handlers.
    pub async fn start(runtime: &RuntimeHandle) -> Result<Self, StartError> {
        Self::start_opts(runtime, StartOpts::new()).await
    }

    /// Starts a manager linked to `parent`.
    pub async fn start_link(runtime: &RuntimeHandle, parent: Pid) -> Result<Self, StartError> {
        Self::start_opts(runtime, StartOpts::new().link(parent)).await
    }

    /// Starts a manager with explicit options.
    pub async fn start_opts(runtime: &RuntimeHandle, opts: StartOpts) -> Result<Self, StartError> {
        let pid = start_process(runtime, opts, run::<E>).await?;
        Ok(Self::from_pid(runtime, pid))
    }

    /// A handle to an already running manager.
    pub fn from_pid(runtime: &RuntimeHandle, pid: Pid) -> Self {
        Self {
            pid,
            runtime: runtime.clone(),
            timeout: DEFAULT_CALL_TIMEOUT,
            _event: PhantomData,
        }
    }

    /// Sets how long requests to the manager may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The manager process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Installs `handler` under `id` after its `init` succeeds.
    pub async fn add_handler<H>(&self, id: impl Into<String>, handler: H) -> Result<(), EventError>
    where
        H: EventHandler<E>,
    {
        let handler: BoxedHandler<E> = Box::new(handler);
        let key = self.runtime.stage(Box::new(handler));
        let result = self.request(Request::Add { id: id.into(), key }).await;
        // Still staged if the manager never picked it up.
        drop(self.runtime.unstage::<BoxedHandler<E>>(key));
        result.map(drop)
    }

    /// Removes the handler `id`, running its `terminate`.
    pub async fn delete_handler(&self, id: &str) -> Result<(), EventError> {
        self.request(Request::Delete(id.to_string())).await.map(drop)
    }

    /// Ids of the installed handlers, in dispatch order.
    pub async fn which_handlers(&self) -> Result<Vec<String>, EventError> {
        match self.request(Request::Which).await? {
            Response::Handlers(ids) => Ok(ids),
            other => Err(unexpected(other)),
        }
    }

    /// Sends `event` to every handler without waiting.
    pub fn notify(&self, event: E) -> Result<(), EventError> {
        let event = event.encode().map_err(CallError::from)?;
        Ok(self.runtime.send_content(self.pid, Content::Cast(event))?)
    }

    /// Sends `event` to every handler and waits until all have handled it.
    pub async fn sync_notify(&self, event: E) -> Result<(), EventError> {
        let event = event.encode().map_err(CallError::from)?;
        self.request(Request::SyncNotify(event)).await.map(drop)
    }

    /// Sends `request` to the handler `id` and returns its reply.
    pub async fn call<Req: Term, Rep: Term>(
        &self,
        id: &str,
        request: Req,
    ) -> Result<Rep, EventError> {
        let request = request.encode().map_err(CallError::from)?;
        let call = Request::Call {
            id: id.to_string(),
            request,
        };
        match self.request(call).await? {
            Response::Reply(reply) => Ok(reply.decode::<Rep>().map_err(CallError::from)?),
            other => Err(unexpected(other)),
        }
    }

    /// Stops the manager. Every handler's `terminate` runs with `reason`.
    pub async fn stop(&self, reason: ExitReason) -> Result<(), EventError> {
        Ok(self
            .runtime
            .request_stop(self.pid, reason, Some(self.timeout))
            .await?)
    }

    async fn request(&self, request: Request) -> Result<Response, EventError> {
        let request = request.encode().map_err(CallError::from)?;
        let reply = self
            .runtime
            .call_raw(self.pid, request, Some(self.timeout))
            .await?;
        match reply.decode::<Response>().map_err(CallError::from)? {
            Response::Refused(refusal) => Err(refusal.into()),
            response => Ok(response),
        }
    }
}

fn unexpected(response: Response) -> EventError {
    CallError::BadTerm(format!("unexpected response {response:?}")).into()
}

struct Installed<E> {
    id: String,
    handler: BoxedHandler<E>,
}

struct Manager<E> {
    pid: Pid,
    handlers: Vec<Installed<E>>,
}

async fn run<E: Term>(starter: Starter) -> ExitReason {
    let ctx = runtime::context();
    starter.started();
    tracing::debug!(pid = %ctx.pid(), "event manager started");

    let mut manager = Manager::<E> {
        pid: ctx.pid(),
        handlers: Vec::new(),
    };
    let reason = manager.serve(&ctx).await;
    for mut installed in manager.handlers.drain(..) {
        run_terminate(manager.pid, &reason, installed.handler.terminate(&reason)).await;
    }
    reason
}

impl<E: Term> Manager<E> {
    async fn serve(&mut self, ctx: &Context) -> ExitReason {
        loop {
            let Ok(message) = ctx.recv().await else {
                return ExitReason::Normal;
            };
            match classify(ctx, message) {
                Dispatch::Call { from, request } => {
                    let response = match request.decode::<Request>() {
                        Ok(request) => self.handle_request(ctx, request).await,
                        Err(error) => {
                            tracing::warn!(pid = %self.pid, caller = %from.caller, %error, "dropping undecodable request");
                            continue;
                        }
                    };
                    let sent = response
                        .encode()
                        .map(|reply| ctx.runtime().reply_raw(from.caller, from.reference, reply));
                    if !matches!(sent, Ok(Ok(()))) {
                        tracing::debug!(pid = %self.pid, caller = %from.caller, "reply not delivered");
                    }
                }
                Dispatch::Cast(event) => self.broadcast(&event).await,
                Dispatch::Info(info) => self.broadcast_info(info).await,
                Dispatch::Stop(reason) => return reason,
                Dispatch::Ignore => {}
            }
        }
    }

    async fn handle_request(&mut self, ctx: &Context, request: Request) -> Response {
        match request {
            Request::Add { id, key } => {
                let Some(mut handler) = ctx.runtime().unstage::<BoxedHandler<E>>(key) else {
                    return Response::Refused(Refusal::NotFound(id));
                };
                if self.position(&id).is_some() {
                    return Response::Refused(Refusal::AlreadyExists(id));
                }
                match guarded(handler.init()).await {
                    Ok(Ok(())) => {
                        tracing::debug!(pid = %self.pid, handler = %id, "handler added");
                        self.handlers.push(Installed { id, handler });
                        Response::Done
                    }
                    Ok(Err(reason)) | Err(reason) => {
                        Response::Refused(Refusal::InitFailed(id, reason))
                    }
                }
            }
            Request::Delete(id) => match self.position(&id) {
                Some(index) => {
                    self.remove(index, ExitReason::Normal).await;
                    Response::Done
                }
                None => Response::Refused(Refusal::NotFound(id)),
            },
            Request::Which => {
                Response::Handlers(self.handlers.iter().map(|h| h.id.clone()).collect())
            }
            Request::SyncNotify(event) => {
                self.broadcast(&event).await;
                Response::Done
            }
            Request::Call { id, request } => {
                let Some(index) = self.position(&id) else {
                    return Response::Refused(Refusal::NotFound(id));
                };
                match guarded(self.handlers[index].handler.handle_call(request)).await {
                    Ok(HandlerReply::Ok(reply)) => Response::Reply(reply),
                    Ok(HandlerReply::Remove(reply)) => {
                        self.remove(index, ExitReason::Normal).await;
                        Response::Reply(reply)
                    }
                    Err(reason) => {
                        tracing::warn!(pid = %self.pid, handler = %id, %reason, "handler crashed");
                        self.remove(index, reason.clone()).await;
                        Response::Refused(Refusal::Crashed(id, reason))
                    }
                }
            }
        }
    }

    /// Each handler decodes its own copy of the event.
    async fn broadcast(&mut self, event: &RawTerm) {
        let mut index = 0;
        while index < self.handlers.len() {
            let event = match event.decode::<E>() {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(pid = %self.pid, %error, "dropping undecodable event");
                    return;
                }
            };
            let outcome = guarded(self.handlers[index].handler.handle_event(event)).await;
            if !self.settle(index, outcome).await {
                index += 1;
            }
        }
    }

    async fn broadcast_info(&mut self, info: Info) {
        let mut index = 0;
        while index < self.handlers.len() {
            let outcome = guarded(self.handlers[index].handler.handle_info(info.clone())).await;
            if !self.settle(index, outcome).await {
                index += 1;
            }
        }
    }

    /// Returns whether the handler at `index` was removed.
    async fn settle(&mut self, index: usize, outcome: Result<HandlerResult, ExitReason>) -> bool {
        match outcome {
            Ok(HandlerResult::Ok) => false,
            Ok(HandlerResult::Remove) => {
                self.remove(index, ExitReason::Normal).await;
                true
            }
            Err(reason) => {
                tracing::warn!(pid = %self.pid, handler = %self.handlers[index].id, %reason, "handler crashed");
                self.remove(index, reason).await;
                true
            }
        }
    }

    async fn remove(&mut self, index: usize, reason: ExitReason) {
        let mut installed = self.handlers.remove(index);
        run_terminate(self.pid, &reason, installed.handler.terminate(&reason)).await;
        tracing::debug!(pid = %self.pid, handler = %installed.id, %reason, "handler removed");
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.id == id)
    }
}

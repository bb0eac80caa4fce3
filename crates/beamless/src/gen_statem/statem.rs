//! The [`GenStatem`] trait and its process loop.

use super::types::{Action, Event, InitResult, Transition};
use crate::behavior::{
    classify, guarded, run_terminate, start_process, Dispatch, From, StartError, StartOpts,
    Starter,
};
use crate::core::{ExitReason, Pid, Term};
use crate::runtime::{
    self, CallError, Content, Context, RecvError, RuntimeHandle, SendError, ServerRef,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;

/// The transition type a [`GenStatem`] returns.
pub type StatemTransition<M> = Transition<
    <M as GenStatem>::State,
    <M as GenStatem>::Reply,
    <M as GenStatem>::Event,
>;

/// A state machine.
///
/// ```
/// use async_trait::async_trait;
/// use beamless::gen_statem::{Event, GenStatem, InitResult, StatemTransition, Transition};
///
/// #[derive(Debug, Clone, PartialEq)]
/// enum Light { Off, On }
///
/// struct Switch;
///
/// #[async_trait]
/// impl GenStatem for Switch {
///     type State = Light;
///     type Data = u32;
///     type InitArg = ();
///     type Event = ();
///     type Reply = u32;
///
///     async fn init(_: ()) -> InitResult<Light, u32> {
///         InitResult::Ok(Light::Off, 0)
///     }
///
///     async fn handle_event(
///         event: Event<()>,
///         state: &Light,
///         flips: &mut u32,
///     ) -> StatemTransition<Self> {
///         match event {
///             Event::Cast(()) => {
///                 *flips += 1;
///                 let next = if *state == Light::Off { Light::On } else { Light::Off };
///                 Transition::next_state(next)
///             }
///             Event::Call(from, ()) => Transition::keep_state().reply(from, *flips),
///             _ => Transition::keep_state(),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait GenStatem: Sized + Send + Sync + 'static {
    /// The named state.
    type State: Clone + PartialEq + Debug + Send + Sync + 'static;
    /// Data carried across states.
    type Data: Send + 'static;
    /// Argument of `init`.
    type InitArg: Send + 'static;
    /// Payload of calls, casts and internal events.
    type Event: Term;
    /// Replies to calls.
    type Reply: Term;

    /// Picks the initial state and data.
    async fn init(arg: Self::InitArg) -> InitResult<Self::State, Self::Data>;

    /// Handles one event in the current state.
    async fn handle_event(
        event: Event<Self::Event>,
        state: &Self::State,
        data: &mut Self::Data,
    ) -> StatemTransition<Self>;

    /// Runs after every change to a different state.
    async fn state_enter(_from: &Self::State, _to: &Self::State, _data: &mut Self::Data) {}

    /// Runs once before the machine exits, unless it was killed.
    async fn terminate(_reason: &ExitReason, _state: &Self::State, _data: &mut Self::Data) {}
}

/// Starts an unlinked state machine.
pub async fn start<M: GenStatem>(
    runtime: &RuntimeHandle,
    arg: M::InitArg,
) -> Result<Pid, StartError> {
    start_opts::<M>(runtime, arg, StartOpts::new()).await
}

/// Starts a state machine linked to `parent`.
pub async fn start_link<M: GenStatem>(
    runtime: &RuntimeHandle,
    parent: Pid,
    arg: M::InitArg,
) -> Result<Pid, StartError> {
    start_opts::<M>(runtime, arg, StartOpts::new().link(parent)).await
}

/// Starts a state machine with explicit options.
pub async fn start_opts<M: GenStatem>(
    runtime: &RuntimeHandle,
    arg: M::InitArg,
    opts: StartOpts,
) -> Result<Pid, StartError> {
    start_process(runtime, opts, move |starter| run::<M>(arg, starter)).await
}

struct Machine<M: GenStatem> {
    state: M::State,
    data: M::Data,
    internal: VecDeque<M::Event>,
    timeout_at: Option<Instant>,
}

enum Next<E> {
    Event(Event<E>),
    Stop(ExitReason),
    Skip,
}

async fn run<M: GenStatem>(arg: M::InitArg, starter: Starter) -> ExitReason {
    let ctx = runtime::context();
    let pid = ctx.pid();

    let (state, data) = match guarded(M::init(arg)).await {
        Ok(InitResult::Ok(state, data)) => {
            starter.started();
            (state, data)
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
    tracing::debug!(%pid, ?state, "state machine started");

    let mut machine = Machine::<M> {
        state,
        data,
        internal: VecDeque::new(),
        timeout_at: None,
    };
    let reason = machine.run(&ctx).await;
    run_terminate(
        pid,
        &reason,
        M::terminate(&reason, &machine.state, &mut machine.data),
    )
    .await;
    reason
}

impl<M: GenStatem> Machine<M> {
    async fn run(&mut self, ctx: &Context) -> ExitReason {
        loop {
            let event = match self.next(ctx).await {
                Next::Event(event) => event,
                Next::Stop(reason) => return reason,
                Next::Skip => continue,
            };

            let handled = guarded(M::handle_event(event, &self.state, &mut self.data)).await;
            let transition = match handled {
                Ok(transition) => transition,
                Err(reason) => return reason,
            };
            if let Some(reason) = self.apply(ctx, transition).await {
                return reason;
            }
        }
    }

    async fn next(&mut self, ctx: &Context) -> Next<M::Event> {
        if let Some(event) = self.internal.pop_front() {
            return Next::Event(Event::Internal(event));
        }

        let received = match self.timeout_at {
            Some(at) => ctx.recv_timeout(at.saturating_duration_since(Instant::now())).await,
            None => ctx.recv().await,
        };
        let message = match received {
            Ok(message) => message,
            Err(RecvError::Timeout) => {
                self.timeout_at = None;
                return Next::Event(Event::Timeout);
            }
            Err(RecvError::Closed) => return Next::Stop(ExitReason::Normal),
        };

        let pid = ctx.pid();
        match classify(ctx, message) {
            Dispatch::Call { from, request } => match request.decode() {
                Ok(event) => Next::Event(Event::Call(from, event)),
                Err(error) => {
                    tracing::warn!(%pid, caller = %from.caller, %error, "dropping undecodable call");
                    Next::Skip
                }
            },
            Dispatch::Cast(msg) => match msg.decode() {
                Ok(event) => Next::Event(Event::Cast(event)),
                Err(error) => {
                    tracing::warn!(%pid, %error, "dropping undecodable cast");
                    Next::Skip
                }
            },
            Dispatch::Info(info) => Next::Event(Event::Info(info)),
            Dispatch::Stop(reason) => Next::Stop(reason),
            Dispatch::Ignore => Next::Skip,
        }
    }

    /// Applies a transition. Returns the exit reason if the machine stops.
    async fn apply(
        &mut self,
        ctx: &Context,
        transition: StatemTransition<M>,
    ) -> Option<ExitReason> {
        let (next_state, actions, stop) = match transition {
            Transition::KeepState(actions) => (None, actions, None),
            Transition::NextState(state, actions) => (Some(state), actions, None),
            Transition::Stop(reason, actions) => (None, actions, Some(reason)),
        };

        let mut entered = None;
        if let Some(state) = next_state {
            if state != self.state {
                self.timeout_at = None;
                tracing::trace!(pid = %ctx.pid(), from = ?self.state, to = ?state, "state change");
                entered = Some(std::mem::replace(&mut self.state, state));
            }
        }

        for action in actions {
            match action {
                Action::Reply(from, reply) => send_reply(ctx.runtime(), &from, &reply),
                Action::StateTimeout(after) => self.timeout_at = Some(Instant::now() + after),
                Action::NextEvent(event) => self.internal.push_back(event),
            }
        }

        if let Some(reason) = stop {
            return Some(reason);
        }
        if let Some(previous) = entered {
            let outcome = guarded(M::state_enter(&previous, &self.state, &mut self.data)).await;
            if let Err(reason) = outcome {
                return Some(reason);
            }
        }
        None
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

/// Sends `event` as a call and waits up to `timeout` for the reply.
pub async fn call<M: GenStatem>(
    runtime: &RuntimeHandle,
    server: impl Into<ServerRef>,
    event: M::Event,
    timeout: Duration,
) -> Result<M::Reply, CallError> {
    let pid = runtime.resolve(&server.into())?;
    let reply = runtime.call_raw(pid, event.encode()?, Some(timeout)).await?;
    Ok(reply.decode::<M::Reply>()?)
}

/// Sends `event` as a cast.
pub fn cast<M: GenStatem>(
    runtime: &RuntimeHandle,
    server: impl Into<ServerRef>,
    event: M::Event,
) -> Result<(), SendError> {
    let pid = runtime.resolve(&server.into())?;
    runtime.send_content(pid, Content::Cast(event.encode()?))
}

/// Stops the machine with `reason`, waiting up to `timeout` for it to exit.
pub async fn stop(
    runtime: &RuntimeHandle,
    server: impl Into<ServerRef>,
    reason: ExitReason,
    timeout: Duration,
) -> Result<(), CallError> {
    let pid = runtime.resolve(&server.into())?;
    runtime.request_stop(pid, reason, Some(timeout)).await
}

//! Pieces shared by every behavior process: the start handshake, message
//! classification and panic isolation around callbacks.

use crate::core::{ExitReason, Pid, RawTerm, Ref};
use crate::runtime::{self, Content, Context, Message, RegistryError, RuntimeHandle};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Default time a behavior's `init` may take.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifies a pending call, for replying later with `reply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct From {
    /// The calling process.
    pub caller: Pid,
    /// The reference the reply must carry.
    pub reference: Ref,
}

/// Anything a behavior receives that is not a call, a cast or a stop order.
#[derive(Debug, Clone)]
pub enum Info {
    /// A plain message sent with `send`.
    Message {
        /// The sender.
        from: Pid,
        /// The undecoded payload.
        term: RawTerm,
    },
    /// An exit signal from a linked process, received while trapping exits.
    Exit {
        /// The process that exited.
        from: Pid,
        /// Its exit reason.
        reason: ExitReason,
    },
    /// A monitored process went down.
    Down {
        /// The process that went down.
        pid: Pid,
        /// The monitor that fired.
        reference: Ref,
        /// Its exit reason.
        reason: ExitReason,
    },
}

/// A behavior process could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StartError {
    /// The requested name is held by another process.
    #[error("already started as {0}")]
    AlreadyStarted(Pid),

    /// `init` asked to stop, failed or panicked.
    #[error("init stopped: {0}")]
    Stop(ExitReason),

    /// `init` returned `Ignore`; no process is left running.
    #[error("init returned ignore")]
    Ignore,

    /// `init` did not finish within the start timeout. The process was killed.
    #[error("init timed out")]
    Timeout,
}

/// How to start a behavior process.
#[derive(Debug, Clone)]
pub struct StartOpts {
    link: Option<Pid>,
    name: Option<String>,
    timeout: Duration,
}

impl Default for StartOpts {
    fn default() -> Self {
        Self {
            link: None,
            name: None,
            timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

impl StartOpts {
    /// Unlinked, unnamed, with the default init timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Links the new process to `parent` before it runs.
    pub fn link(mut self, parent: Pid) -> Self {
        self.link = Some(parent);
        self
    }

    /// Registers the new process under `name` before `init` runs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// How long `init` may take.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reports the outcome of `init` back to the starting caller.
pub(crate) struct Starter {
    tx: oneshot::Sender<Result<(), StartError>>,
}

impl Starter {
    pub(crate) fn started(self) {
        let _ = self.tx.send(Ok(()));
    }

    /// Reports a failed start. The process unlinks from its parent first, so
    /// the failure reaches the parent only through the start result.
    pub(crate) fn failed(self, ctx: &Context, error: StartError) {
        if let Some(parent) = ctx.parent() {
            ctx.unlink(parent);
        }
        let _ = self.tx.send(Err(error));
    }
}

/// Spawns a behavior process and waits for it to report the outcome of
/// `init` through its [`Starter`].
pub(crate) async fn start_process<F, Fut>(
    runtime: &RuntimeHandle,
    opts: StartOpts,
    body: F,
) -> Result<Pid, StartError>
where
    F: FnOnce(Starter) -> Fut + Send + 'static,
    Fut: Future<Output = ExitReason> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let name = opts.name.clone();
    let (pid, _) = runtime.spawn_opts(
        move || async move {
            let starter = Starter { tx };
            if let Some(name) = name {
                let ctx = runtime::context();
                if let Err(RegistryError::NameTaken { holder, .. }) = ctx.register(name) {
                    starter.failed(&ctx, StartError::AlreadyStarted(holder));
                    return ExitReason::Normal;
                }
            }
            body(starter).await
        },
        opts.link,
        None,
    );

    match tokio::time::timeout(opts.timeout, rx).await {
        Ok(Ok(Ok(()))) => Ok(pid),
        Ok(Ok(Err(error))) => Err(error),
        // The process died before reporting, e.g. it was killed.
        Ok(Err(_)) => Err(StartError::Stop(ExitReason::Killed)),
        Err(_) => {
            if let Some(parent) = opts.link {
                runtime.unlink(parent, pid);
            }
            runtime.exit(pid, ExitReason::Killed);
            Err(StartError::Timeout)
        }
    }
}

/// Runs a callback, turning a panic into an [`ExitReason::Error`].
pub(crate) async fn guarded<F: Future>(f: F) -> Result<F::Output, ExitReason> {
    AssertUnwindSafe(f)
        .catch_unwind()
        .await
        .map_err(|panic| ExitReason::Error(runtime::panic_message(panic.as_ref())))
}

/// Runs a `terminate` callback, logging a panic instead of propagating it.
pub(crate) async fn run_terminate<F: Future<Output = ()>>(pid: Pid, reason: &ExitReason, f: F) {
    if let Err(panic) = guarded(f).await {
        tracing::error!(%pid, %reason, error = %panic, "terminate callback panicked");
    }
}

/// A mailbox message, sorted by what a behavior should do with it.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Call { from: From, request: RawTerm },
    Cast(RawTerm),
    Info(Info),
    Stop(ExitReason),
    Ignore,
}

pub(crate) fn classify(ctx: &Context, message: Message) -> Dispatch {
    let from = message.from;
    match message.content {
        Content::Call { reference, request } => Dispatch::Call {
            from: From {
                caller: from,
                reference,
            },
            request,
        },
        Content::Cast(msg) => Dispatch::Cast(msg),
        Content::Info(term) => Dispatch::Info(Info::Message { from, term }),
        Content::Exit(reason) if ctx.is_stop_signal(from) => Dispatch::Stop(reason),
        Content::Exit(reason) => Dispatch::Info(Info::Exit { from, reason }),
        Content::Down { reference, reason } => Dispatch::Info(Info::Down {
            pid: from,
            reference,
            reason,
        }),
        Content::Stop(reason) => Dispatch::Stop(reason),
        Content::Reply { .. } => Dispatch::Ignore,
    }
}

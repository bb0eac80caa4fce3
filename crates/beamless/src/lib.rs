//! # beamless
//!
//! Erlang/OTP-style processes, behaviors and supervision trees on tokio.
//!
//! - **Processes**: tokio tasks with a mailbox, addressed by [`Pid`] and
//!   optionally by a registered name.
//! - **Links and monitors**: exit signals propagate along links; monitors
//!   deliver a one-shot `Down` message.
//! - **Behaviors**: [`gen_server`], [`gen_statem`] and [`gen_event`] turn a
//!   trait implementation into a process loop.
//! - **Supervision**: [`supervisor`] restarts failed children by strategy,
//!   within a restart intensity limit.
//! - **Nodes and applications**: a [`node::Node`] owns a runtime and starts
//!   [`application`]s, which usually root a supervision tree.
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use beamless::gen_server::{self, CallResult, From, GenServer, InitResult};
//! use beamless::Runtime;
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl GenServer for Echo {
//!     type State = ();
//!     type InitArg = ();
//!     type Call = String;
//!     type Cast = ();
//!     type Reply = String;
//!
//!     async fn init(_: ()) -> InitResult<()> {
//!         InitResult::ok(())
//!     }
//!
//!     async fn handle_call(request: String, _from: From, _: &mut ()) -> CallResult<String> {
//!         CallResult::reply(request)
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let rt = Runtime::new("demo@localhost").handle();
//! let echo = gen_server::start::<Echo>(&rt, ()).await.unwrap();
//! let reply = gen_server::call::<Echo>(&rt, echo, "hello".to_string(), Duration::from_secs(1))
//!     .await
//!     .unwrap();
//! assert_eq!(reply, "hello");
//! # }
//! ```

#![warn(missing_docs)]

mod behavior;
mod error;

pub mod application;
pub mod config;
pub mod core;
pub mod gen_event;
pub mod gen_server;
pub mod gen_statem;
pub mod logging;
pub mod node;
pub mod runtime;
pub mod supervisor;

pub use crate::core::{Atom, ExitReason, Pid, RawTerm, Ref, Term, TermError};
pub use crate::error::{Error, Result};
pub use crate::runtime::{
    current_pid, recv, recv_timeout, send, try_current_pid, try_recv, with_ctx, Content,
    Context, DeliveryOutcome, Message, Runtime, RuntimeHandle, ServerRef, Transport,
};

/// Prelude module for convenient imports.
///
/// ```
/// use beamless::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{Atom, ExitReason, Pid, RawTerm, Ref, Term};
    pub use crate::runtime::{
        current_pid, recv, recv_timeout, send, try_current_pid, try_recv, with_ctx, Content,
        Context, Message, Runtime, RuntimeHandle, ServerRef,
    };

    pub use crate::gen_server::{CallResult, CastResult, From, GenServer, InfoResult, InitResult};

    pub use crate::supervisor::{
        ChildSpec, ChildType, RestartType, ShutdownType, Strategy, Supervisor, SupervisorFlags,
        SupervisorSpec,
    };

    pub use crate::application::{AppConfig, AppController, AppSpec, Application, StartResult};
    pub use crate::config::NodeConfig;
    pub use crate::node::Node;
}

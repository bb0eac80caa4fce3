//! The process runtime: mailboxes, the registry, spawning and signals.
//!
//! A [`Runtime`] owns one node's process table. Processes are tokio tasks
//! that receive [`Message`]s from their [`Mailbox`], and are addressed by
//! [`Pid`](crate::Pid) through the [`ProcessRegistry`].
//!
//! ```no_run
//! use beamless::runtime::{self, Runtime};
//!
//! # async fn example() {
//! let rt = Runtime::new("demo@localhost").handle();
//! let pid = rt.spawn(|| async {
//!     while let Ok(message) = runtime::recv().await {
//!         tracing::info!(?message, "got");
//!     }
//! });
//! rt.send_content(pid, beamless::Content::Info(beamless::Term::encode(&"hi".to_string()).unwrap()))
//!     .unwrap();
//! # }
//! ```

mod context;
mod error;
mod mailbox;
mod process_handle;
mod registry;
mod scheduler;
mod server_ref;
mod task_local;
mod transport;

pub use context::Context;
pub use error::{CallError, LinkError, RecvError, RegistryError, SendError};
pub use mailbox::{Content, Mailbox, MailboxSender, Message};
pub use process_handle::ProcessHandle;
pub use registry::ProcessRegistry;
pub use scheduler::{Runtime, RuntimeHandle, ShutdownReport};
pub use server_ref::ServerRef;
pub use task_local::{
    context, current_pid, recv, recv_timeout, send, try_context, try_current_pid, try_recv,
    with_ctx,
};
pub use transport::{DeliveryOutcome, Transport};

pub(crate) use scheduler::panic_message;

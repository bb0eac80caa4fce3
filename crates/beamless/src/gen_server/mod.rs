//! Request/response servers.
//!
//! Implement [`GenServer`] for a type and start it with [`start`],
//! [`start_link`] or [`start_opts`]. Clients talk to it with [`call`] (waits
//! for a reply) and [`cast`] (fire and forget); anything else sent to the
//! server arrives in `handle_info`.

mod server;
mod types;

pub use crate::behavior::{From, Info, StartError, StartOpts};
pub use crate::runtime::CallError;
pub use server::{
    call, call_infinity, cast, reply, start, start_link, start_opts, stop, GenServer,
    DEFAULT_CALL_TIMEOUT,
};
pub use types::{CallResult, CastResult, InfoResult, InitResult};

//! Applications: named units that start a supervision tree on a node.
//!
//! Implement [`Application`] for a type, register it with an
//! [`AppController`] and start it by name. Dependencies named in its
//! [`AppSpec`] are started first; [`AppController::stop_all`] stops
//! applications in reverse start order.

mod core;
mod error;
mod types;

pub use self::core::{AppController, Application};
pub use error::ApplicationError;
pub use types::{AppConfig, AppInfo, AppSpec, ConfigValue, StartResult};

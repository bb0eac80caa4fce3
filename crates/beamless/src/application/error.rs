use crate::behavior::StartError;
use thiserror::Error;

/// An application could not be started or stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    /// No application is registered under this name.
    #[error("application {0:?} is not registered")]
    NotFound(String),

    /// The application is already running.
    #[error("application {0:?} is already running")]
    AlreadyRunning(String),

    /// The application is not running.
    #[error("application {0:?} is not running")]
    NotRunning(String),

    /// The dependencies form a cycle, listed in visiting order.
    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    /// The application's `start` failed.
    #[error("application {0:?} failed to start: {1}")]
    StartFailed(String, StartError),
}

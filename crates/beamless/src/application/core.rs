//! Application trait and controller implementation.

use super::error::ApplicationError;
use super::types::{AppConfig, AppInfo, AppSpec, StartResult};
use crate::behavior::StartError;
use crate::core::{ExitReason, Pid};
use crate::runtime::RuntimeHandle;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

type StartFn = Arc<
    dyn Fn(RuntimeHandle, AppConfig) -> BoxFuture<'static, Result<StartResult, StartError>>
        + Send
        + Sync,
>;

type StopFn = Arc<dyn Fn(Option<Pid>) -> BoxFuture<'static, ()> + Send + Sync>;

/// The Application trait for implementing OTP-style applications.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use beamless::application::{AppConfig, AppSpec, Application, StartResult};
/// use beamless::supervisor::StartError;
/// use beamless::RuntimeHandle;
///
/// struct Metrics;
///
/// #[async_trait]
/// impl Application for Metrics {
///     fn spec() -> AppSpec {
///         AppSpec::new("metrics").description("counters and gauges")
///     }
///
///     async fn start(
///         _runtime: &RuntimeHandle,
///         _config: &AppConfig,
///     ) -> Result<StartResult, StartError> {
///         Ok(StartResult::None)
///     }
/// }
/// ```
#[async_trait]
pub trait Application: Sized + Send + Sync + 'static {
    /// Returns the application specification.
    fn spec() -> AppSpec;

    /// Starts the application, usually its root supervisor.
    async fn start(runtime: &RuntimeHandle, config: &AppConfig) -> Result<StartResult, StartError>;

    /// Runs before the application's root process is shut down.
    async fn stop(_pid: Option<Pid>) {}
}

struct RegisteredApp {
    spec: AppSpec,
    start: StartFn,
    stop: StopFn,
}

struct RunningApp {
    name: String,
    pid: Option<Pid>,
}

/// Starts and stops the applications of one runtime.
///
/// An application whose root process exits on its own, for example a
/// supervisor that gave up after too many restarts, stops counting as
/// running.
pub struct AppController {
    registered: RwLock<HashMap<String, RegisteredApp>>,
    /// In start order.
    running: Arc<RwLock<Vec<RunningApp>>>,
    runtime: RuntimeHandle,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for AppController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppController")
            .field("registered", &self.registered.read().len())
            .field("running", &self.running.read().len())
            .finish()
    }
}

impl AppController {
    /// A controller for `runtime`. Root processes that do not stop within
    /// `shutdown_timeout` are killed.
    pub fn new(runtime: RuntimeHandle, shutdown_timeout: Duration) -> Self {
        Self {
            registered: RwLock::new(HashMap::new()),
            running: Arc::new(RwLock::new(Vec::new())),
            runtime,
            shutdown_timeout,
        }
    }

    /// Registers an application type. A later registration under the same
    /// name replaces the earlier one.
    pub fn register<A: Application>(&self) {
        let spec = A::spec();
        let app = RegisteredApp {
            spec: spec.clone(),
            start: Arc::new(|runtime: RuntimeHandle, config: AppConfig| {
                async move { A::start(&runtime, &config).await }.boxed()
            }),
            stop: Arc::new(|pid: Option<Pid>| async move { A::stop(pid).await }.boxed()),
        };
        self.registered.write().insert(spec.name, app);
    }

    /// Starts an application and its dependencies.
    pub async fn start(&self, name: &str) -> Result<(), ApplicationError> {
        self.start_with_config(name, AppConfig::new()).await
    }

    /// Starts an application with configuration. Dependencies that are not
    /// running yet are started first with an empty configuration.
    pub async fn start_with_config(
        &self,
        name: &str,
        config: AppConfig,
    ) -> Result<(), ApplicationError> {
        if self.is_running(name) {
            return Err(ApplicationError::AlreadyRunning(name.to_string()));
        }

        for app_name in self.resolve_dependencies(name)? {
            if self.is_running(&app_name) {
                continue;
            }
            let start = self
                .registered
                .read()
                .get(&app_name)
                .map(|app| app.start.clone())
                .ok_or_else(|| ApplicationError::NotFound(app_name.clone()))?;

            let app_config = if app_name == name {
                config.clone()
            } else {
                AppConfig::new()
            };
            let result = start(self.runtime.clone(), app_config)
                .await
                .map_err(|e| ApplicationError::StartFailed(app_name.clone(), e))?;

            tracing::info!(application = %app_name, pid = ?result.pid(), "application started");
            if let Some(pid) = result.pid() {
                self.watch_root(pid);
            }
            self.running.write().push(RunningApp {
                name: app_name,
                pid: result.pid(),
            });
        }

        Ok(())
    }

    /// Forgets the application rooted at `pid` once that process exits.
    /// Entries removed by [`stop`](Self::stop) are gone before their root
    /// exits, so only unexpected exits are seen here.
    fn watch_root(&self, pid: Pid) {
        let runtime = self.runtime.clone();
        let running = Arc::downgrade(&self.running);
        tokio::spawn(async move {
            let reason = runtime.join(pid).await;
            let Some(running) = running.upgrade() else {
                return;
            };
            let mut running = running.write();
            if let Some(index) = running.iter().position(|app| app.pid == Some(pid)) {
                let app = running.remove(index);
                if reason.is_clean() {
                    tracing::info!(application = %app.name, %pid, %reason, "application exited");
                } else {
                    tracing::error!(application = %app.name, %pid, %reason, "application terminated");
                }
            }
        });
    }

    /// Stops an application: runs its `stop`, then shuts its root process
    /// down. Applications depending on it are left running.
    pub async fn stop(&self, name: &str) -> Result<(), ApplicationError> {
        let running = {
            let mut running = self.running.write();
            let index = running
                .iter()
                .position(|app| app.name == name)
                .ok_or_else(|| ApplicationError::NotRunning(name.to_string()))?;
            running.remove(index)
        };

        let stop = self.registered.read().get(name).map(|app| app.stop.clone());
        if let Some(stop) = stop {
            stop(running.pid).await;
        }

        if let Some(pid) = running.pid {
            self.shut_down(pid).await;
        }
        tracing::info!(application = %name, "application stopped");
        Ok(())
    }

    async fn shut_down(&self, pid: Pid) {
        self.runtime.exit(pid, ExitReason::Shutdown);
        if tokio::time::timeout(self.shutdown_timeout, self.runtime.join(pid))
            .await
            .is_err()
        {
            tracing::warn!(%pid, "application did not stop in time, killing");
            self.runtime.exit(pid, ExitReason::Killed);
            self.runtime.join(pid).await;
        }
    }

    /// Stops all running applications in reverse start order.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self
            .running
            .read()
            .iter()
            .rev()
            .map(|app| app.name.clone())
            .collect();
        for name in names {
            let _ = self.stop(&name).await;
        }
    }

    /// Returns the specs of all registered applications.
    pub fn list_registered(&self) -> Vec<AppSpec> {
        self.registered.read().values().map(|app| app.spec.clone()).collect()
    }

    /// Returns information about the running applications, in start order.
    pub fn which_applications(&self) -> Vec<AppInfo> {
        let registered = self.registered.read();
        self.running
            .read()
            .iter()
            .map(|app| AppInfo {
                name: app.name.clone(),
                pid: app.pid,
                dependencies: registered
                    .get(&app.name)
                    .map(|r| r.spec.dependencies.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Checks if an application is running.
    pub fn is_running(&self, name: &str) -> bool {
        self.running.read().iter().any(|app| app.name == name)
    }

    /// Returns `name` and its dependencies, dependencies first.
    fn resolve_dependencies(&self, name: &str) -> Result<Vec<String>, ApplicationError> {
        let registered = self.registered.read();
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        visit(name, &registered, &mut order, &mut visited, &mut path)?;
        Ok(order)
    }
}

fn visit(
    name: &str,
    registered: &HashMap<String, RegisteredApp>,
    order: &mut Vec<String>,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Result<(), ApplicationError> {
    if path.iter().any(|p| p == name) {
        path.push(name.to_string());
        return Err(ApplicationError::CircularDependency(path.clone()));
    }
    if visited.contains(name) {
        return Ok(());
    }

    let app = registered
        .get(name)
        .ok_or_else(|| ApplicationError::NotFound(name.to_string()))?;

    path.push(name.to_string());
    for dep in &app.spec.dependencies {
        visit(dep, registered, order, visited, path)?;
    }
    path.pop();

    visited.insert(name.to_string());
    order.push(name.to_string());
    Ok(())
}

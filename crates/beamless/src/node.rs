//! A named runtime instance with a start/stop lifecycle.
//!
//! A [`Node`] ties a [`NodeConfig`] to a [`Runtime`] and an
//! [`AppController`]. Stopping it stops the applications in reverse start
//! order, then shuts down every remaining process within the configured
//! shutdown timeout.

use crate::application::AppController;
use crate::config::{ConfigError, NodeConfig};
use crate::core::Atom;
use crate::runtime::{Runtime, RuntimeHandle, ShutdownReport, Transport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A node could not be started.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport serves a different node than the one configured.
    #[error("transport serves {transport}, but the node is configured as {configured}")]
    NameMismatch {
        /// The configured node name.
        configured: String,
        /// The transport's node name.
        transport: String,
    },
}

/// A running node.
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    runtime: RuntimeHandle,
    applications: AppController,
}

impl Node {
    /// Starts a node without a transport. Messages to other nodes fail with
    /// [`SendError::NodeUnreachable`](crate::runtime::SendError::NodeUnreachable).
    pub fn start(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let runtime = Runtime::new(&config.name).handle();
        Ok(Self::assemble(config, runtime))
    }

    /// Starts a node whose messages to other nodes go through `transport`.
    pub fn with_transport(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let served = transport.local_node_name();
        if served.as_str().as_ref() != config.name.as_str() {
            return Err(NodeError::NameMismatch {
                configured: config.name,
                transport: served.as_str().to_string(),
            });
        }
        let runtime = Runtime::with_transport(transport).handle();
        Ok(Self::assemble(config, runtime))
    }

    fn assemble(config: NodeConfig, runtime: RuntimeHandle) -> Self {
        tracing::info!(node = %config.name, ?config, "node started");
        let applications = AppController::new(runtime.clone(), config.shutdown_timeout);
        Self {
            config,
            runtime,
            applications,
        }
    }

    /// The node name.
    pub fn name(&self) -> Atom {
        self.runtime.node()
    }

    /// The node's runtime.
    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// The node's application controller.
    pub fn applications(&self) -> &AppController {
        &self.applications
    }

    /// The configuration the node was started with.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The timeout to use for calls that do not name one.
    pub fn call_timeout(&self) -> Duration {
        self.config.default_call_timeout
    }

    /// Stops every application, then every remaining process. Processes
    /// still alive after the shutdown timeout are killed.
    pub async fn stop(self) -> ShutdownReport {
        self.applications.stop_all().await;
        let report = self.runtime.shutdown(self.config.shutdown_timeout).await;
        tracing::info!(
            node = %self.config.name,
            graceful = report.graceful,
            forced = report.forced,
            lingering = report.lingering,
            "node stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExitReason, Pid};
    use crate::runtime::{self, DeliveryOutcome, Message};

    struct Loopback(Atom);

    impl Transport for Loopback {
        fn local_node_name(&self) -> Atom {
            self.0
        }

        fn deliver_remote(&self, _to: Pid, _message: Message) -> DeliveryOutcome {
            DeliveryOutcome::NodeUnreachable
        }
    }

    #[test]
    fn invalid_names_are_refused() {
        let err = Node::start(NodeConfig::new("no-host")).unwrap_err();
        assert!(matches!(err, NodeError::Config(ConfigError::InvalidNodeName(_))));

        let transport = Arc::new(Loopback(Atom::new("other@host")));
        let err = Node::with_transport(NodeConfig::new("node@host"), transport).unwrap_err();
        assert_eq!(
            err,
            NodeError::NameMismatch {
                configured: "node@host".into(),
                transport: "other@host".into(),
            }
        );
    }

    #[tokio::test]
    async fn without_a_transport_other_nodes_are_unreachable() {
        let node = Node::start(NodeConfig::new("alone@host")).unwrap();
        let elsewhere = Pid::from_parts("other@host", 1, 0, 1);
        assert!(matches!(
            node.runtime().send(elsewhere, &7u32),
            Err(runtime::SendError::NodeUnreachable(node)) if node == Atom::new("other@host")
        ));
    }

    #[tokio::test]
    async fn stop_shuts_down_every_process() {
        let config = NodeConfig::new("stop@host").shutdown_timeout(Duration::from_millis(200));
        let node = Node::start(config).unwrap();
        assert_eq!(&*node.name().as_str(), "stop@host");
        assert_eq!(node.call_timeout(), Duration::from_secs(5));

        let rt = node.runtime().clone();
        let polite = rt.spawn(|| async {
            while runtime::recv().await.is_ok() {}
        });
        let stubborn = rt.spawn(|| async {
            runtime::context().set_trap_exit(true);
            while runtime::recv().await.is_ok() {}
        });
        while !rt
            .registry()
            .get_process(stubborn)
            .is_some_and(|handle| handle.is_trapping_exits())
        {
            tokio::task::yield_now().await;
        }

        let report = node.stop().await;
        assert_eq!(report, ShutdownReport { graceful: 1, forced: 1, lingering: 0 });
        assert_eq!(rt.join(polite).await, ExitReason::NoProc);
        assert!(!rt.is_alive(stubborn));
    }
}

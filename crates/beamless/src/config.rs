//! Node configuration.
//!
//! A [`NodeConfig`] can be built in code, deserialized from any serde
//! format, or read from the environment with [`NodeConfig::from_env`].

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the node name.
pub const ENV_NODE_NAME: &str = "BEAMLESS_NODE_NAME";
/// Environment variable holding the cookie.
pub const ENV_COOKIE: &str = "BEAMLESS_COOKIE";
/// Environment variable holding the shutdown timeout in milliseconds.
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "BEAMLESS_SHUTDOWN_TIMEOUT_MS";

/// A configuration value could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable holds something unparseable.
    #[error("invalid value {value:?} for {var}")]
    InvalidValue {
        /// The variable.
        var: &'static str,
        /// Its content.
        value: String,
    },

    /// Node names have the form `name@host`.
    #[error("invalid node name {0:?}, expected name@host")]
    InvalidNodeName(String),
}

/// Settings of one node.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// The node name, `name@host`.
    pub name: String,
    /// Shared secret for transports that authenticate peers.
    pub cookie: Option<String>,
    /// How long [`Node::stop`](crate::node::Node::stop) waits before
    /// killing the processes still alive.
    #[serde(with = "millis", rename = "shutdown_timeout_ms")]
    pub shutdown_timeout: Duration,
    /// Timeout for calls made through the node's helpers.
    #[serde(with = "millis", rename = "default_call_timeout_ms")]
    pub default_call_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "nonode@nohost".to_string(),
            cookie: None,
            shutdown_timeout: Duration::from_secs(5),
            default_call_timeout: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("name", &self.name)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("default_call_timeout", &self.default_call_timeout)
            .finish()
    }
}

impl NodeConfig {
    /// Default settings for the node `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by whichever `BEAMLESS_*` variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(name) = lookup(ENV_NODE_NAME) {
            config.name = name;
        }
        if let Some(cookie) = lookup(ENV_COOKIE) {
            config.cookie = Some(cookie);
        }
        if let Some(value) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            let ms = value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                var: ENV_SHUTDOWN_TIMEOUT_MS,
                value,
            })?;
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the node name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the cookie.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    /// Sets the shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the default call timeout.
    pub fn default_call_timeout(mut self, timeout: Duration) -> Self {
        self.default_call_timeout = timeout;
        self
    }

    /// Checks the node name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.name.split_once('@') {
            Some((name, host)) if !name.is_empty() && !host.is_empty() && !host.contains('@') => {
                Ok(())
            }
            _ => Err(ConfigError::InvalidNodeName(self.name.clone())),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[
            (ENV_NODE_NAME, "app@db1"),
            (ENV_COOKIE, "secret"),
            (ENV_SHUTDOWN_TIMEOUT_MS, "250"),
        ]))
        .unwrap();

        assert_eq!(config.name, "app@db1");
        assert_eq!(config.cookie.as_deref(), Some("secret"));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.default_call_timeout, Duration::from_secs(5));
    }

    #[test]
    fn bad_values_are_reported() {
        let err =
            NodeConfig::from_lookup(lookup(&[(ENV_SHUTDOWN_TIMEOUT_MS, "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: ENV_SHUTDOWN_TIMEOUT_MS,
                value: "soon".into()
            }
        );

        let err = NodeConfig::from_lookup(lookup(&[(ENV_NODE_NAME, "nohost")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidNodeName("nohost".into()));
    }

    #[test]
    fn deserializes_with_millisecond_timeouts() {
        let config: NodeConfig = serde_json::from_str(
            r#"{"name": "app@db1", "shutdown_timeout_ms": 250, "default_call_timeout_ms": 1500}"#,
        )
        .unwrap();
        assert_eq!(config.name, "app@db1");
        assert_eq!(config.cookie, None);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.default_call_timeout, Duration::from_millis(1500));

        let config: NodeConfig = serde_json::from_str(r#"{"cookie": "secret"}"#).unwrap();
        assert_eq!(config, NodeConfig::default().cookie("secret"));

        assert!(serde_json::from_str::<NodeConfig>(r#"{"shutdown_timeout_ms": -1}"#).is_err());
    }

    #[test]
    fn debug_hides_the_cookie() {
        let config = NodeConfig::new("a@b").cookie("hunter2");
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}

//! Application types and configuration.

use crate::core::Pid;
use serde::Deserialize;
use std::collections::HashMap;

/// Application configuration as key-value pairs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct AppConfig {
    values: HashMap<String, ConfigValue>,
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Integer(i64),
    /// A floating point value.
    Float(f64),
    /// A string value.
    String(String),
    /// A list of values.
    List(Vec<ConfigValue>),
}

impl AppConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value.
    pub fn set(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Gets a string value.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ConfigValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Gets an integer value.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ConfigValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Gets a boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(ConfigValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Gets a raw config value.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<i64> for ConfigValue {
    fn from(i: i64) -> Self {
        ConfigValue::Integer(i)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

/// The result of starting an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartResult {
    /// Application started a supervisor tree.
    Supervisor(Pid),
    /// Application started a single process.
    Process(Pid),
    /// Application has no process (library application).
    None,
}

impl StartResult {
    /// Returns the PID if the application started a process.
    pub fn pid(&self) -> Option<Pid> {
        match self {
            StartResult::Supervisor(pid) | StartResult::Process(pid) => Some(*pid),
            StartResult::None => None,
        }
    }
}

/// Information about a running application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    /// The application name.
    pub name: String,
    /// The application's root PID, if any.
    pub pid: Option<Pid>,
    /// Applications this one depends on.
    pub dependencies: Vec<String>,
}

/// Application specification for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    /// The application name.
    pub name: String,
    /// Applications this one depends on (must be started first).
    pub dependencies: Vec<String>,
    /// Description of the application.
    pub description: String,
}

impl AppSpec {
    /// Creates a new application specification.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            description: String::new(),
        }
    }

    /// Adds a dependency.
    pub fn depends_on(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Sets the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}

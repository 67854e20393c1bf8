//! Backend Capability Contract
//!
//! Every message-queue backend a module exports implements [`Backend`]. The
//! host only ever talks to backends through this trait and reads their
//! outcomes from the [`OperateResult`] envelope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::event::EventPublisher;
use crate::produce::Payload;
use crate::result::OperateResult;

/// Interface name a module must list for an exported type to be hosted
pub const BACKEND_INTERFACE: &str = "Snet.Mq.Backend";

// ─────────────────────────────────────────────────────────────────────────────
// Backend Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while constructing a backend from its config
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Invalid config for {type_name}: {message}")]
    InvalidConfig { type_name: String, message: String },

    #[error("Missing config field: {0}")]
    MissingField(String),

    #[error("Backend type is abstract: {0}")]
    Abstract(String),

    #[error("{0}")]
    Other(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A message-queue endpoint hosted by the plugin host
///
/// Operations never return `Err`; failures travel in the envelope so the
/// host can report them as diagnostics.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Connect to the broker
    async fn open(&self) -> OperateResult;

    /// Disconnect; `hard` drops pending work instead of flushing it
    async fn close(&self, hard: bool) -> OperateResult;

    /// Report connection status
    async fn status(&self) -> OperateResult;

    /// Publish a payload on a topic
    async fn produce(&self, topic: &str, payload: &Payload) -> OperateResult;

    /// Start consuming a topic
    async fn consume(&self, topic: &str) -> OperateResult;

    /// Stop consuming a topic
    async fn unconsume(&self, topic: &str) -> OperateResult;
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a factory needs to build one instance
#[derive(Debug, Clone)]
pub struct BackendContext {
    /// Instance key, `{type}.{sn}`
    pub key: String,

    /// Fully qualified type name
    pub type_name: String,

    /// Instance serial
    pub sn: String,

    /// Parsed config object
    pub config: serde_json::Value,

    /// Publisher for asynchronous diagnostics (received messages etc.)
    pub events: EventPublisher,
}

impl BackendContext {
    /// Bind the config object onto a typed settings struct by field name
    pub fn parse_config<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        serde_json::from_value(self.config.clone()).map_err(|e| BackendError::InvalidConfig {
            type_name: self.type_name.clone(),
            message: e.to_string(),
        })
    }

    /// Read a single string field
    pub fn field_str(&self, name: &str) -> Result<&str, BackendError> {
        self.config
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| BackendError::MissingField(name.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exported Types
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a backend from its context
pub type BackendFactory =
    Arc<dyn Fn(BackendContext) -> Result<Arc<dyn Backend>, BackendError> + Send + Sync>;

/// One type exported by a module
#[derive(Clone)]
pub struct ExportedType {
    /// Fully qualified type name
    pub name: String,

    /// Interfaces the type claims to implement
    pub interfaces: Vec<String>,

    /// Constructor; `None` marks an abstract type
    pub factory: Option<BackendFactory>,
}

impl ExportedType {
    /// A concrete backend type
    pub fn backend<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(BackendContext) -> Result<Arc<dyn Backend>, BackendError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interfaces: vec![BACKEND_INTERFACE.to_string()],
            factory: Some(Arc::new(factory)),
        }
    }

    /// An exported type that cannot be instantiated
    pub fn abstract_type(name: impl Into<String>, interfaces: Vec<String>) -> Self {
        Self {
            name: name.into(),
            interfaces,
            factory: None,
        }
    }

    /// Add an interface name
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    /// Whether the host should register this type
    pub fn is_hostable(&self) -> bool {
        self.factory.is_some() && self.interfaces.iter().any(|i| i == BACKEND_INTERFACE)
    }
}

impl std::fmt::Debug for ExportedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedType")
            .field("name", &self.name)
            .field("interfaces", &self.interfaces)
            .field("abstract", &self.factory.is_none())
            .finish()
    }
}

//! Snet MQ - Plugin messaging host
//!
//! Hosts message-queue backends that are discovered at runtime:
//!
//! - a **library watcher** loads backend modules dropped into a directory and
//!   registers the backend types they export
//! - a **config watcher** binds `{TypeFullName}.{InstanceSN}.<suffix>` files
//!   to registered types and creates running instances
//! - instances are opened automatically; failed opens are retried on a fixed
//!   interval until they succeed
//! - [`PluginHost::produce`] fans a message out through a bounded queue to a
//!   pool of workers that deliver it to every (or a chosen subset of) open
//!   instance
//!
//! # Lifecycle
//!
//! ```text
//! Configured -> Opening -> Open
//!                      \-> FailedOpen -> (retry) -> Open
//! Open -> Closed   (removal or shutdown)
//! ```

mod backend;
mod event;
mod host;
mod instance;
mod loader;
mod naming;
mod options;
mod produce;
mod registry;
mod result;
mod watcher;

pub mod builtin;

pub use backend::*;
pub use event::*;
pub use host::*;
pub use instance::*;
pub use loader::*;
pub use naming::*;
pub use options::*;
pub use produce::{Payload, ProduceRequest};
pub use registry::*;
pub use result::*;

// ─────────────────────────────────────────────────────────────────────────────
// Host Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors surfaced by the plugin host API
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("Backend type not registered: {0}")]
    TypeNotRegistered(String),

    #[error("Instance already exists: {0}")]
    InstanceExists(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Module load failed: {0}")]
    ModuleLoad(String),

    #[error("Invalid config file name: {0}")]
    InvalidFileName(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Backend construction failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Host is shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        HostError::Io(e.to_string())
    }
}

/// Result type for host operations
pub type HostResult<T> = Result<T, HostError>;

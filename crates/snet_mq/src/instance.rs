//! Plugin Instance
//!
//! A running backend plus its lifecycle state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::backend::Backend;

// ─────────────────────────────────────────────────────────────────────────────
// Instance State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InstanceState {
    /// Constructed from its config, not opened yet
    Configured = 0,
    /// Open in progress
    Opening = 1,
    /// Connected and accepting produce calls
    Open = 2,
    /// Last open attempt failed; queued for retry
    FailedOpen = 3,
    /// Closed by removal or shutdown
    Closed = 4,
}

impl InstanceState {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Configured,
            1 => Self::Opening,
            2 => Self::Open,
            3 => Self::FailedOpen,
            _ => Self::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        *self == InstanceState::Open
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Configured => write!(f, "configured"),
            InstanceState::Opening => write!(f, "opening"),
            InstanceState::Open => write!(f, "open"),
            InstanceState::FailedOpen => write!(f, "failed_open"),
            InstanceState::Closed => write!(f, "closed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Instance
// ─────────────────────────────────────────────────────────────────────────────

/// A hosted backend keyed by `{type}.{sn}`
pub struct PluginInstance {
    pub key: String,
    pub type_name: String,
    pub sn: String,
    pub(crate) backend: Arc<dyn Backend>,
    state: AtomicU8,
}

impl PluginInstance {
    pub(crate) fn new(
        key: String,
        type_name: String,
        sn: String,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            key,
            type_name,
            sn,
            backend,
            state: AtomicU8::new(InstanceState::Configured as u8),
        }
    }

    /// Current state (lock-free read)
    pub fn state(&self) -> InstanceState {
        InstanceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub(crate) fn set_state(&self, state: InstanceState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from → to`; fails if another transition got there first
    pub(crate) fn transition(&self, from: InstanceState, to: InstanceState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Access the backend directly
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_and_default() {
        for state in [
            InstanceState::Configured,
            InstanceState::Opening,
            InstanceState::Open,
            InstanceState::FailedOpen,
            InstanceState::Closed,
        ] {
            assert_eq!(InstanceState::from_u8(state as u8), state);
        }
        assert_eq!(InstanceState::from_u8(200), InstanceState::Closed);
        assert_eq!(InstanceState::FailedOpen.to_string(), "failed_open");
    }
}

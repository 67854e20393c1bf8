//! Uniform result envelope returned by every backend operation

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// `(success, message, elapsed, data)` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperateResult {
    /// Whether the operation succeeded
    pub success: bool,

    /// Diagnostic text
    #[serde(default)]
    pub message: String,

    /// Wall time spent in the operation
    #[serde(default)]
    pub elapsed_ms: u64,

    /// Optional operation-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl OperateResult {
    /// Successful result with no message
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
            elapsed_ms: 0,
            data: None,
        }
    }

    /// Successful result carrying data
    pub fn ok_with(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    /// Failed result with a message
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            elapsed_ms: 0,
            data: None,
        }
    }

    /// Stamp the elapsed time since `started`
    pub fn timed(mut self, started: Instant) -> Self {
        self.elapsed_ms = started.elapsed().as_millis() as u64;
        self
    }

    /// Replace the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl std::fmt::Display for OperateResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        if self.message.is_empty() {
            write!(f, "{} ({}ms)", status, self.elapsed_ms)
        } else {
            write!(f, "{}: {} ({}ms)", status, self.message, self.elapsed_ms)
        }
    }
}

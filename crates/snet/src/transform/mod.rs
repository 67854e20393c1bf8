//! Transform Stage
//!
//! Optional post-conversion step declared on an address. Outcomes:
//!
//! | transform            | result          | quality            |
//! |----------------------|-----------------|--------------------|
//! | none declared        | converted value | `Normal`           |
//! | returned a value     | returned value  | `ParsedUnverified` |
//! | failed/panicked/empty| `Null`          | `ParseError`       |

mod method;
mod script;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use tracing::warn;

use snet_types::{ParseParams, Quality, Value};

pub use method::{HandleFactory, Linear, MethodHandle, MethodRegistry, Text};
pub use script::{ScriptCache, ScriptHandle};

// ─────────────────────────────────────────────────────────────────────────────
// Transform Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("Unknown transform handle: {0}")]
    UnknownHandle(String),

    #[error("Transform handle '{handle}' failed to initialise: {message}")]
    HandleInit { handle: String, message: String },

    #[error("'{handle}' has no method '{method}'")]
    MethodNotFound { handle: String, method: String },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Transform failed: {0}")]
    Failed(String),

    #[error("Transform returned no value")]
    Empty,

    #[error("Transform panicked: {0}")]
    Panicked(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Transform Stage
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of the transform stage
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub value: Value,
    pub quality: Quality,
    pub message: String,
}

/// Method handles plus script handles
pub struct TransformStage {
    methods: MethodRegistry,
    scripts: ScriptCache,
}

impl Default for TransformStage {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TransformStage {
    /// Stage with the built-in method handles; relative script paths resolve
    /// against `script_root`
    pub fn new(script_root: Option<PathBuf>) -> Self {
        Self {
            methods: MethodRegistry::with_builtin(),
            scripts: ScriptCache::new(script_root),
        }
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    /// Run a transform, returning `Err` on failure
    pub fn try_apply(
        &self,
        params: &ParseParams,
        address: &str,
        value: &Value,
    ) -> Result<Value, TransformError> {
        let result = catch_unwind(AssertUnwindSafe(|| match params {
            ParseParams::Method { handle, method } => {
                self.methods.handle(handle)?.call(method, address, value)
            }
            ParseParams::Script { script, function } => {
                self.scripts.handle(script)?.call(function, address, value)
            }
        }))
        .map_err(|panic| TransformError::Panicked(panic_message(panic.as_ref())))??;

        if result.is_empty() {
            return Err(TransformError::Empty);
        }
        Ok(result)
    }

    /// Run the transform declared on an address, if any
    pub fn apply(&self, params: Option<&ParseParams>, address: &str, value: Value) -> Transformed {
        let Some(params) = params else {
            return Transformed {
                value,
                quality: Quality::Normal,
                message: String::new(),
            };
        };

        match self.try_apply(params, address, &value) {
            Ok(result) => Transformed {
                value: result,
                quality: Quality::ParsedUnverified,
                message: String::new(),
            },
            Err(e) => {
                warn!(address, "Transform failed: {}", e);
                Transformed {
                    value: Value::Null,
                    quality: Quality::ParseError,
                    message: e.to_string(),
                }
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn method(handle: &str, method: &str) -> ParseParams {
        ParseParams::Method {
            handle: handle.into(),
            method: method.into(),
        }
    }

    #[test]
    fn test_no_transform_passes_through() {
        let stage = TransformStage::default();
        let out = stage.apply(None, "a", Value::Int32(7));
        assert_eq!(out.value, Value::Int32(7));
        assert_eq!(out.quality, Quality::Normal);
    }

    #[test]
    fn test_method_transform_is_unverified() {
        let stage = TransformStage::default();
        let out = stage.apply(Some(&method("linear:10", "scale")), "a", Value::Int32(7));
        assert_eq!(out.value, Value::Double(70.0));
        assert_eq!(out.quality, Quality::ParsedUnverified);
    }

    #[test]
    fn test_script_transform() {
        let stage = TransformStage::default();
        let params = ParseParams::Script {
            script: "function label(name, v) { return name + ':' + v; }".into(),
            function: "label".into(),
        };
        let out = stage.apply(Some(&params), "Valve", Value::Bool(false));
        assert_eq!(out.value, Value::String("Valve:false".into()));
        assert_eq!(out.quality, Quality::ParsedUnverified);
    }

    #[test]
    fn test_failures_become_parse_error() {
        let stage = TransformStage::default();

        let unknown = stage.apply(Some(&method("nope", "x")), "a", Value::Int32(1));
        assert_eq!(unknown.quality, Quality::ParseError);
        assert_eq!(unknown.value, Value::Null);
        assert!(unknown.message.contains("nope"));

        let empty = ParseParams::Script {
            script: "function blank(n, v) { return ''; }".into(),
            function: "blank".into(),
        };
        let out = stage.apply(Some(&empty), "a", Value::Int32(1));
        assert_eq!(out.quality, Quality::ParseError);

        let throws = ParseParams::Script {
            script: "function boom(n, v) { throw new Error('bad reading'); }".into(),
            function: "boom".into(),
        };
        let out = stage.apply(Some(&throws), "a", Value::Int32(1));
        assert_eq!(out.quality, Quality::ParseError);
        assert!(out.message.contains("bad reading"));
    }

    #[test]
    fn test_panicking_handle_is_contained() {
        struct Explodes;
        impl MethodHandle for Explodes {
            fn call(&self, _: &str, _: &str, _: &Value) -> Result<Value, TransformError> {
                panic!("handle exploded");
            }
        }

        let stage = TransformStage::default();
        stage
            .methods()
            .register("explodes", |_| Ok(Arc::new(Explodes) as Arc<dyn MethodHandle>));

        let out = stage.apply(Some(&method("explodes", "go")), "a", Value::Int32(1));
        assert_eq!(out.quality, Quality::ParseError);
        assert!(out.message.contains("handle exploded"));
    }
}

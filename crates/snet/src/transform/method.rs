//! Method handles
//!
//! A handle is identified by its configuration string `name[:args]`, e.g.
//! `linear:0.1,-40`. Factories are registered by `name`; the handle for a
//! given configuration is created on first use and cached. A factory that
//! fails is not cached, so the next call retries it.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use snet_types::Value;

use super::TransformError;

/// A transform object exposing named methods
pub trait MethodHandle: Send + Sync + 'static {
    /// Invoke `method` with the address name and the converted value
    fn call(&self, method: &str, address: &str, value: &Value) -> Result<Value, TransformError>;
}

/// Builds a handle from the argument part of its configuration
pub type HandleFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn MethodHandle>, TransformError> + Send + Sync>;

/// Factories and the lazily created handles
pub struct MethodRegistry {
    factories: DashMap<String, HandleFactory>,
    handles: DashMap<String, Arc<dyn MethodHandle>>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self {
            factories: DashMap::new(),
            handles: DashMap::new(),
        }
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `linear` and `text` handles
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register("linear", |args| Ok(Arc::new(Linear::parse(args)?) as Arc<dyn MethodHandle>));
        registry.register("text", |_| Ok(Arc::new(Text) as Arc<dyn MethodHandle>));
        registry
    }

    /// Register a factory under `name`
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Arc<dyn MethodHandle>, TransformError> + Send + Sync + 'static,
    {
        let name = name.into();
        // Cached handles built by a previous factory of this name are stale
        self.handles
            .retain(|config, _| split_config(config).0 != name.as_str());
        self.factories.insert(name, Arc::new(factory));
    }

    /// Get or create the handle for a configuration string
    pub fn handle(&self, config: &str) -> Result<Arc<dyn MethodHandle>, TransformError> {
        if let Some(handle) = self.handles.get(config) {
            return Ok(Arc::clone(handle.value()));
        }

        let (name, args) = split_config(config);
        let factory = self
            .factories
            .get(name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| TransformError::UnknownHandle(config.to_string()))?;

        match factory(args) {
            Ok(handle) => {
                debug!(handle = %config, "Transform handle created");
                let handle = self
                    .handles
                    .entry(config.to_string())
                    .or_insert(handle)
                    .value()
                    .clone();
                Ok(handle)
            }
            Err(e) => {
                warn!(handle = %config, "Transform handle init failed: {}", e);
                Err(TransformError::HandleInit {
                    handle: config.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Whether a handle for `config` is cached
    pub fn is_cached(&self, config: &str) -> bool {
        self.handles.contains_key(config)
    }
}

fn split_config(config: &str) -> (&str, &str) {
    match config.split_once(':') {
        Some((name, args)) => (name.trim(), args.trim()),
        None => (config.trim(), ""),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in Handles
// ─────────────────────────────────────────────────────────────────────────────

/// `linear:factor[,offset]` with methods `scale` (`v*f+o`) and `unscale`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub factor: f64,
    pub offset: f64,
}

impl Linear {
    fn parse(args: &str) -> Result<Self, TransformError> {
        let invalid = |reason: &str| TransformError::Failed(format!("linear '{}': {}", args, reason));
        let mut parts = args.split(',').map(str::trim);
        let factor = match parts.next() {
            Some(p) if !p.is_empty() => p.parse::<f64>().map_err(|_| invalid("bad factor"))?,
            _ => 1.0,
        };
        let offset = match parts.next() {
            Some(p) => p.parse::<f64>().map_err(|_| invalid("bad offset"))?,
            None => 0.0,
        };
        if parts.next().is_some() {
            return Err(invalid("too many arguments"));
        }
        if factor == 0.0 || !factor.is_finite() {
            return Err(invalid("factor must be finite and non-zero"));
        }
        Ok(Self { factor, offset })
    }
}

impl MethodHandle for Linear {
    fn call(&self, method: &str, _address: &str, value: &Value) -> Result<Value, TransformError> {
        let v = value
            .as_f64()
            .ok_or_else(|| TransformError::Failed(format!("'{}' is not numeric", value)))?;
        match method {
            "scale" => Ok(Value::Double(v * self.factor + self.offset)),
            "unscale" => Ok(Value::Double((v - self.offset) / self.factor)),
            other => Err(TransformError::MethodNotFound {
                handle: "linear".into(),
                method: other.into(),
            }),
        }
    }
}

/// `text` with methods `upper`, `lower`, `trim`, `prefix_name`
#[derive(Debug, Clone, Copy)]
pub struct Text;

impl MethodHandle for Text {
    fn call(&self, method: &str, address: &str, value: &Value) -> Result<Value, TransformError> {
        let text = value.to_string();
        let out = match method {
            "upper" => text.to_uppercase(),
            "lower" => text.to_lowercase(),
            "trim" => text.trim().to_string(),
            "prefix_name" => format!("{}={}", address, text),
            other => {
                return Err(TransformError::MethodNotFound {
                    handle: "text".into(),
                    method: other.into(),
                });
            }
        };
        Ok(Value::String(out))
    }
}

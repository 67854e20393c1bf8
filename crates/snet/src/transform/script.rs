//! Script handles
//!
//! A script reference is either a path (relative to the script root) or an
//! inline source, recognised by containing the `function` keyword. Each
//! distinct reference is evaluated once into its own QuickJS runtime and
//! cached; evaluation failures are not cached.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use snet_types::Value;

use super::TransformError;
use crate::js::JsRuntime;

/// An evaluated script
pub struct ScriptHandle {
    name: String,
    runtime: Mutex<JsRuntime>,
}

impl ScriptHandle {
    /// Evaluate `source` into a fresh runtime
    pub fn load(name: &str, source: &str) -> Result<Self, TransformError> {
        let runtime = JsRuntime::new().map_err(|e| TransformError::Script(e.to_string()))?;
        runtime
            .eval_file(name, source)
            .map_err(|e| TransformError::Script(e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            runtime: Mutex::new(runtime),
        })
    }

    /// Call `function(address, value)`
    pub fn call(&self, function: &str, address: &str, value: &Value) -> Result<Value, TransformError> {
        let runtime = self.runtime.lock();
        if !runtime.has_function(function) {
            return Err(TransformError::MethodNotFound {
                handle: self.name.clone(),
                method: function.to_string(),
            });
        }
        let result = runtime
            .call_function_with_json(function, &[address.into(), value.to_json()])
            .map_err(|e| TransformError::Failed(e.to_string()))?;
        Ok(Value::from_json(&result))
    }
}

/// Script reference → evaluated handle
#[derive(Default)]
pub struct ScriptCache {
    root: Option<PathBuf>,
    scripts: DashMap<String, Arc<ScriptHandle>>,
}

impl ScriptCache {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            scripts: DashMap::new(),
        }
    }

    /// Get or evaluate the script for a reference
    pub fn handle(&self, reference: &str) -> Result<Arc<ScriptHandle>, TransformError> {
        if let Some(handle) = self.scripts.get(reference) {
            return Ok(Arc::clone(handle.value()));
        }

        let (name, source) = if is_inline(reference) {
            ("<inline>".to_string(), reference.to_string())
        } else {
            let path = self.resolve(reference);
            let source = std::fs::read_to_string(&path).map_err(|e| {
                TransformError::Script(format!("cannot read {}: {}", path.display(), e))
            })?;
            (path.display().to_string(), source)
        };

        match ScriptHandle::load(&name, &source) {
            Ok(handle) => {
                debug!(script = %name, "Script loaded");
                let handle = Arc::new(handle);
                Ok(self
                    .scripts
                    .entry(reference.to_string())
                    .or_insert(handle)
                    .value()
                    .clone())
            }
            Err(e) => {
                warn!(script = %name, "Script load failed: {}", e);
                Err(e)
            }
        }
    }

    /// Drop a cached script so the next call re-reads it
    pub fn invalidate(&self, reference: &str) -> bool {
        self.scripts.remove(reference).is_some()
    }

    pub fn is_cached(&self, reference: &str) -> bool {
        self.scripts.contains_key(reference)
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn is_inline(reference: &str) -> bool {
    reference.contains("function") && reference.contains('{')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_script_call() {
        let cache = ScriptCache::new(None);
        let source = "function celsius(name, f) { return (f - 32) * 5 / 9; }";
        let handle = cache.handle(source).unwrap();
        let out = handle.call("celsius", "Oven.Temp", &Value::Int32(212)).unwrap();
        assert_eq!(out.as_f64(), Some(100.0));
        assert!(cache.is_cached(source));
    }

    #[test]
    fn test_file_script_and_failed_load_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ScriptCache::new(Some(dir.path().to_path_buf()));

        assert!(cache.handle("tag.js").is_err());
        assert!(!cache.is_cached("tag.js"));

        std::fs::write(
            dir.path().join("tag.js"),
            "function tag(name, v) { return name + '=' + v; }",
        )
        .unwrap();
        let handle = cache.handle("tag.js").unwrap();
        assert_eq!(
            handle.call("tag", "Pump.On", &Value::Bool(true)).unwrap(),
            Value::String("Pump.On=true".into())
        );

        assert!(cache.invalidate("tag.js"));
        assert!(!cache.is_cached("tag.js"));
    }

    #[test]
    fn test_missing_function() {
        let cache = ScriptCache::new(None);
        let handle = cache.handle("function a(n, v) { return v; }").unwrap();
        assert!(matches!(
            handle.call("b", "x", &Value::Int32(1)),
            Err(TransformError::MethodNotFound { .. })
        ));
    }
}

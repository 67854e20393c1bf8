//! QuickJS Runtime Wrapper
//!
//! Evaluates transform scripts and calls their global functions with JSON
//! arguments.

use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Function, Runtime, Value as JsValue};

use super::globals::register_snet_globals;

// ─────────────────────────────────────────────────────────────────────────────
// JS Runtime Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur in the JavaScript runtime
#[derive(Debug, thiserror::Error)]
pub enum JsError {
    #[error("JavaScript error: {0}")]
    Js(String),

    #[error("Failed to create runtime: {0}")]
    RuntimeCreation(String),

    #[error("Failed to evaluate script: {0}")]
    Eval(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Type conversion error: {0}")]
    Conversion(String),
}

pub type JsResult<T> = Result<T, JsError>;

// ─────────────────────────────────────────────────────────────────────────────
// JS Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// A JavaScript runtime with the `snet` globals installed
pub struct JsRuntime {
    runtime: Runtime,
    context: Context,
}

impl JsRuntime {
    /// Create a new JavaScript runtime
    pub fn new() -> JsResult<Self> {
        let runtime = Runtime::new().map_err(|e| JsError::RuntimeCreation(e.to_string()))?;
        let context =
            Context::full(&runtime).map_err(|e| JsError::RuntimeCreation(e.to_string()))?;

        context.with(|ctx| {
            register_snet_globals(&ctx).map_err(|e| JsError::RuntimeCreation(e.to_string()))
        })?;

        Ok(Self { runtime, context })
    }

    /// Evaluate a snippet and return its completion value
    pub fn eval(&self, script: &str) -> JsResult<serde_json::Value> {
        self.context.with(|ctx| {
            let result: JsValue = ctx
                .eval(script)
                .map_err(|e| JsError::Eval(describe(&ctx, e)))?;
            js_to_json(&ctx, result)
        })
    }

    /// Evaluate a script file in global scope
    pub fn eval_file(&self, name: &str, script: &str) -> JsResult<()> {
        self.context.with(|ctx| {
            let mut options = rquickjs::context::EvalOptions::default();
            options.global = true;
            options.strict = false;
            options.backtrace_barrier = true;

            ctx.eval_with_options::<(), _>(script, options)
                .map_err(|e| JsError::Eval(format!("{}: {}", name, describe(&ctx, e))))
        })
    }

    /// Check if a function exists in the global scope
    pub fn has_function(&self, name: &str) -> bool {
        self.context
            .with(|ctx| ctx.globals().get::<_, Function>(name).is_ok())
    }

    /// Call a global function with JSON arguments
    pub fn call_function_with_json(
        &self,
        name: &str,
        args: &[serde_json::Value],
    ) -> JsResult<serde_json::Value> {
        self.context.with(|ctx| {
            let func: Function = ctx
                .globals()
                .get(name)
                .map_err(|_| JsError::FunctionNotFound(name.to_string()))?;

            let js_args = args
                .iter()
                .map(|arg| json_to_js(&ctx, arg))
                .collect::<JsResult<Vec<_>>>()?;

            let result: JsValue = func
                .call((Rest(js_args),))
                .map_err(|e| JsError::Js(format!("Error calling {}: {}", name, describe(&ctx, e))))?;

            js_to_json(&ctx, result)
        })
    }

    /// Run garbage collection
    pub fn gc(&self) {
        self.runtime.run_gc();
    }
}

/// Message of a pending exception, or the error itself
fn describe(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }
    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        return exception.message().unwrap_or_else(|| "exception".to_string());
    }
    match caught.as_string().and_then(|s| s.to_string().ok()) {
        Some(text) => text,
        None => error.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Convert a JavaScript value to JSON
fn js_to_json<'js>(ctx: &Ctx<'js>, js: JsValue<'js>) -> JsResult<serde_json::Value> {
    use serde_json::Value as J;

    let conversion = |e: rquickjs::Error| JsError::Conversion(e.to_string());
    match js.type_of() {
        rquickjs::Type::Undefined | rquickjs::Type::Null => Ok(J::Null),
        rquickjs::Type::Bool => Ok(J::Bool(js.get().map_err(conversion)?)),
        rquickjs::Type::Int => {
            let i: i32 = js.get().map_err(conversion)?;
            Ok(J::from(i))
        }
        rquickjs::Type::Float => {
            let f: f64 = js.get().map_err(conversion)?;
            Ok(serde_json::Number::from_f64(f).map(J::Number).unwrap_or(J::Null))
        }
        rquickjs::Type::String => Ok(J::String(js.get().map_err(conversion)?)),
        rquickjs::Type::Array => {
            let arr: rquickjs::Array = js.get().map_err(conversion)?;
            let mut values = Vec::with_capacity(arr.len());
            for i in 0..arr.len() {
                let item: JsValue = arr.get(i).map_err(conversion)?;
                values.push(js_to_json(ctx, item)?);
            }
            Ok(J::Array(values))
        }
        rquickjs::Type::Object => {
            let obj: rquickjs::Object = js.get().map_err(conversion)?;
            let mut fields = serde_json::Map::new();
            for prop in obj.props::<String, JsValue>() {
                let (key, val) = prop.map_err(conversion)?;
                fields.insert(key, js_to_json(ctx, val)?);
            }
            Ok(J::Object(fields))
        }
        _ => Ok(J::Null),
    }
}

/// Convert JSON to a JavaScript value
fn json_to_js<'js>(ctx: &Ctx<'js>, json: &serde_json::Value) -> JsResult<JsValue<'js>> {
    use rquickjs::IntoJs;

    let conversion = |e: rquickjs::Error| JsError::Conversion(e.to_string());
    match json {
        serde_json::Value::Null => Ok(JsValue::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(JsValue::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => match n.as_i64().map(i32::try_from) {
            Some(Ok(i)) => Ok(JsValue::new_int(ctx.clone(), i)),
            _ => Ok(JsValue::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN))),
        },
        serde_json::Value::String(s) => s.as_str().into_js(ctx).map_err(conversion),
        serde_json::Value::Array(arr) => {
            let js_arr = rquickjs::Array::new(ctx.clone()).map_err(conversion)?;
            for (i, item) in arr.iter().enumerate() {
                js_arr.set(i, json_to_js(ctx, item)?).map_err(conversion)?;
            }
            Ok(js_arr.into_value())
        }
        serde_json::Value::Object(obj) => {
            let js_obj = rquickjs::Object::new(ctx.clone()).map_err(conversion)?;
            for (key, val) in obj {
                js_obj
                    .set(key.as_str(), json_to_js(ctx, val)?)
                    .map_err(conversion)?;
            }
            Ok(js_obj.into_value())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eval_primitives() {
        let runtime = JsRuntime::new().unwrap();
        assert_eq!(runtime.eval("42").unwrap(), json!(42));
        assert_eq!(runtime.eval("'hello'").unwrap(), json!("hello"));
        assert_eq!(runtime.eval("[1, true, null]").unwrap(), json!([1, true, null]));
        assert_eq!(runtime.eval("({ a: 1.5 })").unwrap(), json!({"a": 1.5}));
    }

    #[test]
    fn test_call_function_with_two_arguments() {
        let runtime = JsRuntime::new().unwrap();
        runtime
            .eval_file("scale.js", "function scale(name, v) { return name + ':' + (v * 10); }")
            .unwrap();
        assert!(runtime.has_function("scale"));
        assert!(!runtime.has_function("missing"));

        let result = runtime
            .call_function_with_json("scale", &[json!("Tank.Level"), json!(4)])
            .unwrap();
        assert_eq!(result, json!("Tank.Level:40"));
    }

    #[test]
    fn test_thrown_error_message_is_kept() {
        let runtime = JsRuntime::new().unwrap();
        runtime
            .eval_file("bad.js", "function bad() { throw new Error('sensor offline'); }")
            .unwrap();
        let err = runtime.call_function_with_json("bad", &[]).unwrap_err();
        assert!(err.to_string().contains("sensor offline"));

        let missing = runtime.call_function_with_json("nope", &[]).unwrap_err();
        assert!(matches!(missing, JsError::FunctionNotFound(_)));
    }
}

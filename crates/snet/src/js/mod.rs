//! JavaScript Runtime
//!
//! QuickJS hosting for script transforms. Scripts see a `snet` global with
//! `log`, `debug`, `warn`, `error` and `now`, plus a `console` routed to
//! tracing.

mod globals;
mod runtime;

pub use globals::register_snet_globals;
pub use runtime::{JsError, JsResult, JsRuntime};

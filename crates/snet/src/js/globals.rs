//! JavaScript Global Objects
//!
//! Registers the `snet` global object and a `console` routed to tracing.

use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Result as JsResult};

/// Register the `snet` global object and `console`
pub fn register_snet_globals(ctx: &Ctx<'_>) -> JsResult<()> {
    let globals = ctx.globals();
    let snet = Object::new(ctx.clone())?;

    register_console(ctx)?;

    snet.set("log", Function::new(ctx.clone(), |msg: String| {
        tracing::info!(target: "snet.js", "{}", msg);
    })?)?;

    snet.set("debug", Function::new(ctx.clone(), |msg: String| {
        tracing::debug!(target: "snet.js", "{}", msg);
    })?)?;

    snet.set("warn", Function::new(ctx.clone(), |msg: String| {
        tracing::warn!(target: "snet.js", "{}", msg);
    })?)?;

    snet.set("error", Function::new(ctx.clone(), |msg: String| {
        tracing::error!(target: "snet.js", "{}", msg);
    })?)?;

    // Wall clock for scripts that stamp their output
    snet.set("now", Function::new(ctx.clone(), || {
        chrono::Local::now()
            .naive_local()
            .format(snet_types::DATETIME_FORMAT)
            .to_string()
    })?)?;

    globals.set("snet", snet)?;
    Ok(())
}

fn register_console(ctx: &Ctx<'_>) -> JsResult<()> {
    let globals = ctx.globals();
    if globals.get::<_, Object>("console").is_ok() {
        return Ok(());
    }

    let console = Object::new(ctx.clone())?;

    console.set("log", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::info!(target: "snet.js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("info", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::info!(target: "snet.js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("warn", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::warn!(target: "snet.js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("error", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::error!(target: "snet.js.console", "{}", args.0.join(" "));
    })?)?;

    console.set("debug", Function::new(ctx.clone(), |args: Rest<String>| {
        tracing::debug!(target: "snet.js.console", "{}", args.0.join(" "));
    })?)?;

    globals.set("console", console)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    #[test]
    fn test_register_globals() {
        let runtime = Runtime::new().unwrap();
        let ctx = Context::full(&runtime).unwrap();

        ctx.with(|ctx| {
            register_snet_globals(&ctx).unwrap();

            let snet: Object = ctx.globals().get("snet").unwrap();
            let _log: Function = snet.get("log").unwrap();

            let _: () = ctx.eval("console.log('from', 'script')").unwrap();
            let now: String = ctx.eval("snet.now()").unwrap();
            assert!(now.starts_with("20"));
        });
    }
}

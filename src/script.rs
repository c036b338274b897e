//! Compiled scripts.
//!
//! A `Script` holds the unbound compilation result, so it can run in any
//! context of the engine that compiled it. Contexts keep every script they
//! ran alive for their own lifetime.

use crate::bridge::BridgeState;
use crate::bridge::call::supervised;
use crate::bridge::convert;
use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub struct Script {
    inner: Rc<ScriptInner>,
}

struct ScriptInner {
    source: String,
    filename: Option<String>,
    unbound: v8::Global<v8::UnboundScript>,
    engine: Engine,
}

impl Script {
    /// Compile `source`. Syntax errors come back as `BridgeError::Js`.
    pub(crate) fn compile(
        scope: &mut v8::PinScope,
        state: &BridgeState,
        source: &str,
        filename: Option<&str>,
    ) -> Result<Self> {
        let text = match filename {
            Some(name) => format!("{}\n//# sourceURL={}", source, name),
            None => source.to_string(),
        };

        let code = convert::v8_string(scope, &text)?;
        let mut compile_source = v8::script_compiler::Source::new(code, None);

        // Compilation runs no script code: no deadline
        let unbound = supervised!(
            scope,
            state,
            0.0,
            |tc| v8::script_compiler::compile_unbound_script(
                &mut tc,
                &mut compile_source,
                v8::script_compiler::CompileOptions::NoCompileOptions,
                v8::script_compiler::NoCacheReason::NoReason,
            ),
            |unbound| Ok(v8::Global::new(&mut tc, unbound))
        )?;

        tracing::trace!(
            "Compiled script {} ({} bytes)",
            filename.unwrap_or("<anonymous>"),
            source.len()
        );

        Ok(Self {
            inner: Rc::new(ScriptInner {
                source: source.to_string(),
                filename: filename.map(str::to_string),
                unbound,
                engine: state.engine.clone(),
            }),
        })
    }

    /// Bind to the context entered in `scope`.
    pub(crate) fn bind<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
        state: &BridgeState,
    ) -> Result<v8::Local<'s, v8::Script>> {
        if !self.inner.engine.ptr_eq(&state.engine) {
            return Err(BridgeError::ForeignEngine);
        }

        let unbound = v8::Local::new(scope, &self.inner.unbound);
        Ok(unbound.bind_to_current_context(scope))
    }

    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn filename(&self) -> Option<&str> {
        self.inner.filename.as_deref()
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub fn ptr_eq(&self, other: &Script) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable while any clone is alive.
    pub(crate) fn identity(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("filename", &self.inner.filename)
            .field("len", &self.inner.source.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{ContextBuilder, EvalOptions};
    use crate::engine::Engine;
    use crate::error::BridgeError;

    #[test]
    fn test_compile_once_run_twice() {
        let engine = Engine::new();
        let ctx = ContextBuilder::new().build(&engine).unwrap();

        let script = ctx
            .compile("globalThis.n = (globalThis.n || 0) + 1", Some("count.js"))
            .unwrap();

        assert_eq!(script.filename(), Some("count.js"));

        ctx.eval(&script).unwrap();
        let n = ctx.eval(&script).unwrap();

        assert_eq!(n.as_number(), Some(2.0));
        assert_eq!(ctx.script_count(), 1);
    }

    #[test]
    fn test_syntax_error() {
        let engine = Engine::new();
        let ctx = ContextBuilder::new().build(&engine).unwrap();

        let err = ctx.compile("let = ;", None).unwrap_err();
        let js = err.as_js().unwrap();

        assert!(js.message.starts_with("SyntaxError"));
    }

    #[test]
    fn test_filename_in_stack() {
        let engine = Engine::new();
        let ctx = ContextBuilder::new().build(&engine).unwrap();

        let err = ctx
            .eval_with(
                "throw new Error('where')",
                EvalOptions::default().filename("where.js"),
            )
            .unwrap_err();

        let stack = err.as_js().and_then(|js| js.stack.clone()).unwrap();
        assert!(stack.contains("where.js"));
    }

    #[test]
    fn test_script_from_other_engine() {
        let engine = Engine::new();
        let ctx = ContextBuilder::new().build(&engine).unwrap();
        let script = ctx.compile("1", None).unwrap();
        drop(ctx);

        let other = Engine::new();
        let other_ctx = ContextBuilder::new().build(&other).unwrap();

        let err = other_ctx.eval(&script).unwrap_err();
        assert!(matches!(err, BridgeError::ForeignEngine));
    }
}

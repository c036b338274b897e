//! Script execution pipeline.
//!
//! compile (or reuse) -> register -> bind to the context -> arm watchdog
//! -> run -> disarm -> convert the value or the exception.

use crate::bridge::call::supervised;
use crate::bridge::{BridgeState, convert};
use crate::error::Result;
use crate::host::HostValue;
use crate::script::Script;

/// What `Context::eval` runs.
#[derive(Debug, Clone, Copy)]
pub enum Program<'a> {
    Source(&'a str),
    Script(&'a Script),
}

impl<'a> From<&'a str> for Program<'a> {
    fn from(source: &'a str) -> Self {
        Self::Source(source)
    }
}

impl<'a> From<&'a String> for Program<'a> {
    fn from(source: &'a String) -> Self {
        Self::Source(source)
    }
}

impl<'a> From<&'a Script> for Program<'a> {
    fn from(script: &'a Script) -> Self {
        Self::Script(script)
    }
}

/// Per-evaluation options.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Overrides the context's timeout (seconds, <= 0 = unbounded)
    pub timeout: Option<f64>,

    /// Reported in stack traces. Ignored for compiled scripts outside of
    /// debug mode.
    pub filename: Option<String>,
}

impl EvalOptions {
    pub fn timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// The script to run for `program`, compiling when needed.
pub(super) fn prepare(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    program: Program,
    filename: Option<&str>,
    debug: bool,
) -> Result<Script> {
    match program {
        Program::Source(source) => Script::compile(scope, state, source, filename),
        Program::Script(script) if debug => {
            tracing::trace!("Debug mode: recompiling script");
            Script::compile(scope, state, script.source(), filename.or(script.filename()))
        }
        Program::Script(script) => Ok(script.clone()),
    }
}

/// Run `script` in the entered context under a watchdog.
pub(super) fn run(
    scope: &mut v8::PinScope,
    state: &BridgeState,
    script: &Script,
    timeout: f64,
) -> Result<HostValue> {
    let bound = script.bind(scope, state)?;

    supervised!(
        scope,
        state,
        timeout,
        |tc| bound.run(&mut tc),
        |value| convert::from_v8(&mut tc, state, value)
    )
}

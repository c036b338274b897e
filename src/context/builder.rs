use super::{Context, ContextInner};
use crate::bridge::{BridgeState, template};
use crate::engine::Engine;
use crate::error::{BridgeError, Result};
use crate::host::{HostClass, HostObject};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::pin::pin;
use std::rc::Rc;

/// What the global object of a new context stands for.
#[derive(Clone)]
pub enum GlobalDefinition {
    /// Constructed with the class's zero-argument constructor
    Class(HostClass),
    /// Used as is
    Instance(Rc<dyn HostObject>),
}

impl From<HostClass> for GlobalDefinition {
    fn from(class: HostClass) -> Self {
        Self::Class(class)
    }
}

impl From<Rc<dyn HostObject>> for GlobalDefinition {
    fn from(object: Rc<dyn HostObject>) -> Self {
        Self::Instance(object)
    }
}

/// Builder for `Context`.
///
/// ```ignore
/// let ctx = Context::builder()
///     .global(HostClass::of::<Api>())
///     .timeout(0.5)
///     .build(&engine)?;
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    global: Option<GlobalDefinition>,
    timeout: Option<f64>,
    debug: bool,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, global: impl Into<GlobalDefinition>) -> Self {
        self.global = Some(global.into());
        self
    }

    /// Default timeout in seconds. Falls back to the engine config.
    pub fn timeout(mut self, secs: f64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Recompile scripts from source on every evaluation.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn build(self, engine: &Engine) -> Result<Context> {
        let host_global = match self.global {
            None => None,
            Some(GlobalDefinition::Class(class)) => Some(class.construct().map_err(|e| {
                BridgeError::Construction(format!("constructor of <{}> failed: {}", class.name(), e))
            })?),
            Some(GlobalDefinition::Instance(object)) => Some(object),
        };

        if let Some(global) = &host_global
            && global.class_name().is_empty()
        {
            return Err(BridgeError::Construction(
                "global object has an empty class name".into(),
            ));
        }

        let timeout = self.timeout.unwrap_or(engine.config().default_timeout);

        let (context, state) = {
            let mut isolate = engine.lock()?;
            let scope = pin!(v8::HandleScope::new(&mut *isolate));
            let mut scope = scope.init();

            let global_template = match &host_global {
                Some(global) => Some(engine.global_template(&mut scope, global.class_name())?),
                None => None,
            };

            let context = v8::Context::new(
                &scope,
                v8::ContextOptions {
                    global_template,
                    ..Default::default()
                },
            );
            let scope = &mut v8::ContextScope::new(&mut scope, context);

            let state = BridgeState::new(scope, engine.clone(), timeout)?;
            context.set_slot(state.clone());

            if let Some(global) = &host_global
                && let Err(e) = template::install_global(scope, &state, global)
            {
                context.remove_slot::<BridgeState>();
                state.clear();
                return Err(e);
            }

            (v8::Global::new(scope, context), state)
        };

        tracing::debug!(
            "Context created (global={}, timeout={})",
            host_global
                .as_ref()
                .map(|g| g.class_name().to_string())
                .unwrap_or_else(|| "<default>".into()),
            timeout
        );

        Ok(Context {
            inner: RefCell::new(Some(ContextInner {
                context,
                state,
                scripts: RefCell::new(HashMap::new()),
                host_global,
            })),
            debug: Cell::new(self.debug),
            engine: engine.clone(),
        })
    }
}

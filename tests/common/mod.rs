#![allow(dead_code)]

use openworkers_bridge_v8::{
    Context, DeriveHostObject, Engine, HostFunction, HostFuture, HostValue, Result,
};
use std::cell::{Cell, RefCell};

/// New engine and context with no timeout.
pub fn context() -> Context {
    Context::builder()
        .build(&Engine::new())
        .expect("context creation")
}

/// New engine and context with a default timeout.
pub fn context_with_timeout(secs: f64) -> Context {
    Context::builder()
        .timeout(secs)
        .build(&Engine::new())
        .expect("context creation")
}

/// `sum(...numbers)`
pub fn sum_function() -> HostFunction {
    HostFunction::new("sum", |args| {
        Ok(HostValue::Number(
            args.iter().filter_map(HostValue::as_number).sum(),
        ))
    })
}

#[derive(DeriveHostObject, Default)]
#[host(name = "Counter")]
pub struct Counter {
    #[host(expose, writable)]
    pub value: Cell<f64>,

    #[host(expose)]
    pub label: String,

    #[host(expose, rename = "tagList")]
    pub tags: Vec<String>,

    pub hidden: u32,
}

/// A future that records every settlement it receives.
#[derive(Debug, Default)]
pub struct RecordingFuture {
    pub results: RefCell<Vec<HostValue>>,
    pub exceptions: RefCell<Vec<HostValue>>,
}

impl RecordingFuture {
    pub fn settlements(&self) -> usize {
        self.results.borrow().len() + self.exceptions.borrow().len()
    }
}

impl HostFuture for RecordingFuture {
    fn set_result(&self, value: HostValue) -> Result<()> {
        self.results.borrow_mut().push(value);
        Ok(())
    }

    fn set_exception(&self, error: HostValue) -> Result<()> {
        self.exceptions.borrow_mut().push(error);
        Ok(())
    }
}

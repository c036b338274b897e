//! Host-side futures settled by the promise bridge.

use super::value::HostValue;
use crate::error::{BridgeError, Result};
use futures::task::AtomicWaker;
use std::cell::RefCell;
use std::future::Future;
use std::task::Poll;

/// The protocol `Context::async_call` speaks to the caller's future.
///
/// Exactly one of the two methods is called, exactly once.
pub trait HostFuture {
    fn set_result(&self, value: HostValue) -> Result<()>;
    fn set_exception(&self, error: HostValue) -> Result<()>;
}

/// Settlement of a `JsFuture`.
#[derive(Debug, Clone)]
pub enum FutureState {
    Pending,
    Fulfilled(HostValue),
    Rejected(HostValue),
}

/// Ready-made `HostFuture`.
///
/// Can be inspected synchronously, or awaited with `wait()`.
#[derive(Debug)]
pub struct JsFuture {
    state: RefCell<FutureState>,
    waker: AtomicWaker,
}

impl Default for JsFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl JsFuture {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(FutureState::Pending),
            waker: AtomicWaker::new(),
        }
    }

    pub fn state(&self) -> FutureState {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), FutureState::Pending)
    }

    /// `None` while pending, `Some(Ok)` when fulfilled, `Some(Err)` with
    /// the rejection reason otherwise.
    pub fn result(&self) -> Option<std::result::Result<HostValue, HostValue>> {
        match &*self.state.borrow() {
            FutureState::Pending => None,
            FutureState::Fulfilled(value) => Some(Ok(value.clone())),
            FutureState::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Wait for settlement.
    ///
    /// Settlement happens while the engine drains microtasks, so something
    /// on this thread must keep driving the context.
    pub fn wait(&self) -> impl Future<Output = std::result::Result<HostValue, HostValue>> + '_ {
        futures::future::poll_fn(move |cx| {
            if let Some(result) = self.result() {
                return Poll::Ready(result);
            }

            self.waker.register(cx.waker());

            match self.result() {
                Some(result) => Poll::Ready(result),
                None => Poll::Pending,
            }
        })
    }

    fn settle(&self, state: FutureState) -> Result<()> {
        {
            let mut current = self.state.borrow_mut();

            if !matches!(*current, FutureState::Pending) {
                return Err(BridgeError::InvalidState("future already settled".into()));
            }

            *current = state;
        }

        self.waker.wake();

        Ok(())
    }
}

impl HostFuture for JsFuture {
    fn set_result(&self, value: HostValue) -> Result<()> {
        self.settle(FutureState::Fulfilled(value))
    }

    fn set_exception(&self, error: HostValue) -> Result<()> {
        self.settle(FutureState::Rejected(error))
    }
}

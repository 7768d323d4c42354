use crate::{
    controller::Controller,
    error::{Error, Result},
};
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Notify;

/// Completion sink of a call: receives the response (or `None`) once the
/// call's controller is settled.
///
/// Closures taking `(Option<T>, &Controller)` implement it, and so does
/// [`CallFuture`].
pub trait Callback<T>: Send + 'static {
    fn run(self, response: Option<T>, controller: &Controller);
}

impl<T, F> Callback<T> for F
where
    F: FnOnce(Option<T>, &Controller) + Send + 'static,
{
    fn run(self, response: Option<T>, controller: &Controller) {
        self(response, controller)
    }
}

/// A satisfy-once completion handle that can be handed to a stub as the
/// callback and then waited on, either blocking or async.
///
/// ```no_run
/// # use tessera_rpc::{CallFuture, diagnostics::{DiagnosticsStub, EchoMessage}};
/// # fn demo(stub: DiagnosticsStub) {
/// let future = CallFuture::new();
/// stub.echo(future.controller(), &EchoMessage::new("hi"), future.clone());
/// let echoed = future.get();
/// assert!(!future.controller().failed());
/// # }
/// ```
pub struct CallFuture<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    /// Outer `Some` once done; inner `None` is a null response or a failure.
    state: Mutex<Option<Option<T>>>,
    done: Condvar,
    notify: Notify,
    controller: Controller,
}

impl<T> CallFuture<T> {
    pub fn new() -> Self {
        Self::with_controller(Controller::new())
    }

    pub fn with_controller(controller: Controller) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(None),
                done: Condvar::new(),
                notify: Notify::new(),
                controller,
            }),
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.inner.controller
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().is_some()
    }

    /// Settles the future. Returns `false` if it was already done.
    pub(crate) fn complete(&self, response: Option<T>, controller: &Controller) -> bool {
        let mut state = self.inner.state.lock();
        if state.is_some() {
            return false;
        }
        self.inner.controller.adopt(controller);
        *state = Some(response);
        drop(state);

        self.inner.done.notify_all();
        self.inner.notify.notify_waiters();
        true
    }
}

impl<T: Clone> CallFuture<T> {
    /// Blocks the calling thread until the call completes.
    ///
    /// Must not be called from an event loop thread.
    pub fn get(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(response) = state.as_ref() {
                return response.clone();
            }
            self.inner.done.wait(&mut state);
        }
    }

    /// Blocks for at most `timeout`.
    ///
    /// On elapse the call stays outstanding: a response arriving later still
    /// settles this future and its controller.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(response) = state.as_ref() {
                return Ok(response.clone());
            }
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                return match state.as_ref() {
                    Some(response) => Ok(response.clone()),
                    None => Err(Error::Timeout(timeout)),
                };
            }
        }
    }

    pub fn try_get(&self) -> Option<Option<T>> {
        self.inner.state.lock().clone()
    }

    /// Waits without blocking a thread.
    pub async fn wait(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(response) = self.try_get() {
                return response;
            }
            notified.await;
        }
    }
}

impl<T> Clone for CallFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for CallFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CallFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFuture")
            .field("done", &self.is_done())
            .field("controller", &self.inner.controller)
            .finish()
    }
}

impl<T: Send + 'static> Callback<T> for CallFuture<T> {
    fn run(self, response: Option<T>, controller: &Controller) {
        self.complete(response, controller);
    }
}

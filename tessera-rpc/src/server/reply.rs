use crate::{
    codec::{ResponseFrame, Status, encode_payload},
    connection::Connection,
    controller::Controller,
    error::Error,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

/// Calls dispatched on one connection and not yet replied to.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    calls: Mutex<HashMap<u32, (u32, Instant)>>,
}

impl InFlight {
    /// Returns `false` if `call_id` was already in flight.
    pub(crate) fn begin(&self, call_id: u32, method_id: u32) -> bool {
        self.calls
            .lock()
            .insert(call_id, (method_id, Instant::now()))
            .is_none()
    }

    fn finish(&self, call_id: u32) -> Option<Duration> {
        self.calls
            .lock()
            .remove(&call_id)
            .map(|(_, started)| started.elapsed())
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forgets every call; replies still arriving for them are dropped.
    pub(crate) fn clear(&self) -> usize {
        let mut calls = self.calls.lock();
        let count = calls.len();
        calls.clear();
        count
    }
}

/// Untyped reply path of one dispatched call.
pub(crate) struct ReplySink {
    call_id: u32,
    conn: Connection<ResponseFrame>,
    in_flight: Arc<InFlight>,
    controller: Controller,
    done: bool,
}

impl ReplySink {
    pub(crate) fn new(call_id: u32, conn: Connection<ResponseFrame>, in_flight: Arc<InFlight>) -> Self {
        Self {
            call_id,
            conn,
            in_flight,
            controller: Controller::new(),
            done: false,
        }
    }

    pub(crate) fn reject(mut self, status: Status, text: String) {
        debug!(call_id = self.call_id, %status, %text, "rejecting call");
        let error = match status {
            Status::MethodNotFound => Error::MethodNotFound(text.clone()),
            Status::MalformedRequest => Error::MalformedRequest(text.clone()),
            _ => Error::Application(text.clone()),
        };
        self.controller.fail(error);
        self.finish(ResponseFrame::error(self.call_id, status, text));
    }

    fn finish(&mut self, frame: ResponseFrame) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }
        let elapsed = self.in_flight.finish(self.call_id);
        trace!(call_id = self.call_id, ?elapsed, "replying");
        if let Err(e) = self.conn.send(frame) {
            debug!(call_id = self.call_id, error = %e, "connection gone, dropping reply");
        }
    }
}

impl Drop for ReplySink {
    fn drop(&mut self) {
        if !self.done {
            let text = if std::thread::panicking() {
                "service panicked before replying"
            } else {
                "service dropped the reply"
            };
            warn!(call_id = self.call_id, "{text}");
            self.controller.fail(Error::Application(text.to_string()));
            self.finish(ResponseFrame::error(self.call_id, Status::ApplicationError, text));
        }
    }
}

/// Response sink handed to a service method.
///
/// May be moved to any thread and completed later. Consuming methods make
/// it satisfy-once; dropping it unreplied fails the call on the caller's
/// side with an application error.
pub struct Reply<T> {
    sink: ReplySink,
    _response: PhantomData<fn(T)>,
}

impl<T: Serialize> Reply<T> {
    pub(crate) fn new(sink: ReplySink) -> Self {
        Self {
            sink,
            _response: PhantomData,
        }
    }

    pub fn call_id(&self) -> u32 {
        self.sink.call_id
    }

    /// Server-side view of the call; settled when the reply is sent.
    pub fn controller(&self) -> &Controller {
        &self.sink.controller
    }

    pub fn send(self, response: T) {
        self.respond(Some(response))
    }

    /// Replies with a null response. The caller sees `None` with a
    /// successful controller.
    pub fn send_null(self) {
        self.respond(None)
    }

    pub fn fail(mut self, text: impl Into<String>) {
        let text = text.into();
        self.sink
            .controller
            .fail(Error::Application(text.clone()));
        let frame = ResponseFrame::error(self.sink.call_id, Status::ApplicationError, text);
        self.sink.finish(frame);
    }

    fn respond(mut self, response: Option<T>) {
        let frame = match encode_payload(&response) {
            Ok(payload) => {
                self.sink.controller.succeed();
                ResponseFrame::success(self.sink.call_id, payload)
            }
            Err(e) => {
                warn!(call_id = self.sink.call_id, error = %e, "could not encode response");
                self.sink.controller.fail(e.clone());
                ResponseFrame::error(self.sink.call_id, Status::ApplicationError, e.to_string())
            }
        };
        self.sink.finish(frame);
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("call_id", &self.sink.call_id)
            .field("done", &self.sink.done)
            .finish()
    }
}

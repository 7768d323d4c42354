use super::Channel;
use crate::{
    codec::{RequestFrame, encode_payload},
    controller::Controller,
    future::{CallFuture, Callback},
    registry::PendingCall,
    service::{Method, Service},
};
use std::{fmt, marker::PhantomData};
use tracing::trace;

/// Client-side proxy for service `S`, bound to one connection.
///
/// Calls never block: the outcome is delivered only through the controller
/// and callback passed in. A stub whose connection has closed fails every
/// call with `ConnectionLost` through that same path.
pub struct Stub<S> {
    channel: Channel,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> Stub<S> {
    pub(super) fn new(channel: Channel) -> Self {
        Self {
            channel,
            _service: PhantomData,
        }
    }

    /// Sends `request` to method `M`.
    ///
    /// `controller` is settled exactly once, right before `done` runs. Use a
    /// fresh controller per call.
    pub fn call<M>(&self, controller: &Controller, request: &M::Request, done: impl Callback<M::Response>)
    where
        M: Method<Service = S>,
    {
        let call = PendingCall::new::<M::Response, _>(M::ID, controller.clone(), done);
        let Some(call_id) = self.channel.registry.register(call) else {
            return;
        };
        trace!(call_id, method = M::NAME, service = S::NAME, "sending call");

        let sent = encode_payload(request).and_then(|payload| {
            self.channel
                .conn
                .send(RequestFrame::new(call_id, M::ID, payload))
        });
        if let Err(e) = sent {
            self.channel.registry.complete(call_id, Err(e));
        }
    }

    /// Sends `request` and returns a future that completes with the response.
    pub fn call_future<M>(&self, request: &M::Request) -> CallFuture<M::Response>
    where
        M: Method<Service = S>,
    {
        let future = CallFuture::new();
        self.call::<M>(future.controller(), request, future.clone());
        future
    }

    pub fn is_connected(&self) -> bool {
        !self.channel.conn.is_closed()
    }
}

impl<S> Clone for Stub<S> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            _service: PhantomData,
        }
    }
}

impl<S: Service> fmt::Debug for Stub<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("service", &S::NAME)
            .field("conn", &self.channel.conn)
            .finish()
    }
}

//! A small protocol for probing a peer: arithmetic, echo, null replies,
//! slow replies and failures. Used by the `tessera` CLI and by the tests.

use crate::{
    client::Stub,
    controller::Controller,
    future::Callback,
    server::RpcService,
    service::{Method, MethodDescriptor, Service},
};
use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

pub struct Diagnostics;

impl Service for Diagnostics {
    const NAME: &'static str = "Diagnostics";

    fn methods() -> &'static [MethodDescriptor] {
        const METHODS: &[MethodDescriptor] = &[
            MethodDescriptor::new(Sum::ID, Sum::NAME),
            MethodDescriptor::new(Echo::ID, Echo::NAME),
            MethodDescriptor::new(GetNull::ID, GetNull::NAME),
            MethodDescriptor::new(Delay::ID, Delay::NAME),
            MethodDescriptor::new(Fail::ID, Fail::NAME),
        ];
        METHODS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SumRequest {
    pub x1: i32,
    pub x2: i64,
    pub x3: f64,
    pub x4: f32,
}

impl SumRequest {
    pub fn total(&self) -> f64 {
        self.x1 as f64 + self.x2 as f64 + self.x3 + self.x4 as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SumResponse {
    pub result: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoMessage {
    pub message: String,
}

impl EchoMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

macro_rules! method {
    ($name:ident, $id:literal, $method:literal, $request:ty => $response:ty) => {
        pub struct $name;

        impl Method for $name {
            type Service = Diagnostics;
            type Request = $request;
            type Response = $response;

            const ID: u32 = $id;
            const NAME: &'static str = $method;
        }
    };
}

method!(Sum, 1, "sum", SumRequest => SumResponse);
method!(Echo, 2, "echo", EchoMessage => EchoMessage);
method!(GetNull, 3, "get_null", EchoMessage => EchoMessage);
method!(Delay, 4, "delay", EchoMessage => EchoMessage);
method!(Fail, 5, "fail", EchoMessage => EchoMessage);

/// Server-side state of the diagnostics service.
#[derive(Debug)]
pub struct DiagnosticsState {
    delay: Duration,
    get_null_called: AtomicBool,
}

impl DiagnosticsState {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            get_null_called: AtomicBool::new(false),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn get_null_called(&self) -> bool {
        self.get_null_called.load(Ordering::Acquire)
    }
}

impl Default for DiagnosticsState {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

/// The diagnostics implementation. `delay` replies from a thread of its
/// own, `fail` runs as an async task, everything else answers inline.
pub fn service(state: DiagnosticsState) -> RpcService<Diagnostics, DiagnosticsState> {
    RpcService::<Diagnostics, _>::with_state(state)
        .register::<Sum>(|_, request, reply| {
            reply.send(SumResponse {
                result: request.total(),
            })
        })
        .register::<Echo>(|_, request, reply| reply.send(request))
        .register::<GetNull>(|state, _, reply| {
            state.get_null_called.store(true, Ordering::Release);
            reply.send_null()
        })
        .register::<Delay>(|state, request, reply| {
            let delay = state.delay;
            thread::spawn(move || {
                thread::sleep(delay);
                reply.send(request)
            });
        })
        .register_async::<Fail, _, _>(|_, request| async move {
            Err::<EchoMessage, _>(format!("refused to answer `{}`", request.message))
        })
}

/// Typed per-method proxy over [`Stub<Diagnostics>`].
#[derive(Debug, Clone)]
pub struct DiagnosticsStub {
    stub: Stub<Diagnostics>,
}

impl DiagnosticsStub {
    pub fn sum(&self, controller: &Controller, request: &SumRequest, done: impl Callback<SumResponse>) {
        self.stub.call::<Sum>(controller, request, done)
    }

    pub fn echo(&self, controller: &Controller, request: &EchoMessage, done: impl Callback<EchoMessage>) {
        self.stub.call::<Echo>(controller, request, done)
    }

    pub fn get_null(&self, controller: &Controller, request: &EchoMessage, done: impl Callback<EchoMessage>) {
        self.stub.call::<GetNull>(controller, request, done)
    }

    pub fn delay(&self, controller: &Controller, request: &EchoMessage, done: impl Callback<EchoMessage>) {
        self.stub.call::<Delay>(controller, request, done)
    }

    pub fn fail(&self, controller: &Controller, request: &EchoMessage, done: impl Callback<EchoMessage>) {
        self.stub.call::<Fail>(controller, request, done)
    }

    pub fn is_connected(&self) -> bool {
        self.stub.is_connected()
    }
}

impl From<Stub<Diagnostics>> for DiagnosticsStub {
    fn from(stub: Stub<Diagnostics>) -> Self {
        Self { stub }
    }
}

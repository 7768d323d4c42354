//! Asynchronous RPC for talking between tessera processes.
//!
//! Many calls share one persistent connection. Each call is completed
//! exactly once through the [`Controller`] and [`Callback`] the caller
//! passes in; a [`CallFuture`] is a callback that can also be waited on.
//!
//! # Examples
//!
//! ```no_run
//! use tessera_rpc::{
//!     CallFuture, Client, EventLoop,
//!     config::{ClientConfig, ServerConfig},
//!     diagnostics::{self, Diagnostics, DiagnosticsState, DiagnosticsStub, SumRequest},
//!     server::Server,
//! };
//!
//! let server = Server::bind(
//!     diagnostics::service(DiagnosticsState::default()),
//!     ServerConfig::default(),
//! )
//! .unwrap();
//! server.start().unwrap();
//!
//! let event_loop = EventLoop::new("client", 2).unwrap();
//! let client = Client::<Diagnostics>::new(
//!     server.listen_address().into(),
//!     &event_loop,
//!     ClientConfig::default(),
//! )
//! .unwrap();
//!
//! let stub = DiagnosticsStub::from(client.stub());
//! let future = CallFuture::new();
//! let request = SumRequest { x1: 1, x2: 2, x3: 3.15, x4: 2.0 };
//! stub.sum(future.controller(), &request, future.clone());
//! println!("{:?}", future.get());
//!
//! drop(client);
//! server.shutdown();
//! event_loop.shutdown();
//! ```

pub mod address;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod event_loop;
pub mod future;
pub mod registry;
pub mod server;
pub mod service;
#[cfg(test)]
mod tests;

pub use address::Address;
pub use client::{Client, Stub};
pub use controller::Controller;
pub use error::{Error, ErrorKind, Result};
pub use event_loop::EventLoop;
pub use future::{CallFuture, Callback};
pub use server::{Reply, RpcService, Server};
pub use service::{Method, MethodDescriptor, Service};

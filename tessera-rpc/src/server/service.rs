use super::reply::{Reply, ReplySink};
use crate::{
    codec::{Status, decode_payload},
    service::{Method, Service},
};
use bytes::Bytes;
use std::{collections::HashMap, fmt, future::Future, marker::PhantomData, sync::Arc};
use tracing::warn;

type MethodHandler<St> = Box<dyn Fn(&Arc<St>, Bytes, ReplySink) + Send + Sync>;

/// Type-erased dispatch used by the server.
pub(crate) trait Dispatch: Send + Sync + 'static {
    fn service_name(&self) -> &'static str;

    fn dispatch(&self, method_id: u32, payload: Bytes, sink: ReplySink);
}

/// Implementation of service `S`, built method by method.
///
/// ```no_run
/// use tessera_rpc::{
///     config::ServerConfig,
///     diagnostics::{Diagnostics, Echo},
///     server::{RpcService, Server},
/// };
///
/// let service = RpcService::<Diagnostics>::new()
///     .register::<Echo>(|_, request, reply| reply.send(request));
/// let server = Server::bind(service, ServerConfig::default()).unwrap();
/// server.start().unwrap();
/// ```
pub struct RpcService<S, St = ()> {
    state: Arc<St>,
    handlers: HashMap<u32, MethodHandler<St>>,
    _service: PhantomData<fn() -> S>,
}

impl<S: Service> RpcService<S, ()> {
    pub fn new() -> Self {
        Self::with_state(())
    }
}

impl<S: Service> Default for RpcService<S, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Service, St: Send + Sync + 'static> RpcService<S, St> {
    pub fn with_state(state: St) -> Self {
        Self {
            state: Arc::new(state),
            handlers: HashMap::new(),
            _service: PhantomData,
        }
    }

    pub fn state(&self) -> &Arc<St> {
        &self.state
    }

    /// Registers a method that runs on the I/O thread that read the request.
    ///
    /// `handler` must not block; it may move the [`Reply`] to another thread
    /// and complete it from there.
    pub fn register<M>(mut self, handler: impl Fn(&St, M::Request, Reply<M::Response>) + Send + Sync + 'static) -> Self
    where
        M: Method<Service = S>,
    {
        let handler = move |state: &Arc<St>, payload: Bytes, sink: ReplySink| {
            match decode_payload::<M::Request>(&payload) {
                Ok(request) => handler(&**state, request, Reply::new(sink)),
                Err(e) => sink.reject(Status::MalformedRequest, format!("{}: {e}", M::NAME)),
            }
        };
        self.insert::<M>(Box::new(handler));
        self
    }

    /// Registers a method whose body runs as a task on the server's event
    /// loop. An `Err` is reported to the caller as an application error.
    pub fn register_async<M, F, Fut>(mut self, handler: F) -> Self
    where
        M: Method<Service = S>,
        F: Fn(Arc<St>, M::Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Response, String>> + Send + 'static,
    {
        let handler = move |state: &Arc<St>, payload: Bytes, sink: ReplySink| {
            match decode_payload::<M::Request>(&payload) {
                Ok(request) => {
                    let reply = Reply::<M::Response>::new(sink);
                    let call = handler(state.clone(), request);
                    tokio::spawn(async move {
                        match call.await {
                            Ok(response) => reply.send(response),
                            Err(text) => reply.fail(text),
                        }
                    });
                }
                Err(e) => sink.reject(Status::MalformedRequest, format!("{}: {e}", M::NAME)),
            }
        };
        self.insert::<M>(Box::new(handler));
        self
    }

    fn insert<M: Method>(&mut self, handler: MethodHandler<St>) {
        if self.handlers.insert(M::ID, handler).is_some() {
            warn!(service = S::NAME, method = M::NAME, id = M::ID, "method registered twice, keeping the last");
        }
    }
}

impl<S: Service, St: Send + Sync + 'static> Dispatch for RpcService<S, St> {
    fn service_name(&self) -> &'static str {
        S::NAME
    }

    fn dispatch(&self, method_id: u32, payload: Bytes, sink: ReplySink) {
        match self.handlers.get(&method_id) {
            Some(handler) => handler(&self.state, payload, sink),
            None => {
                let text = match S::method(method_id) {
                    Some(method) => format!("{}: {method} is not implemented", S::NAME),
                    None => format!("{}: no method with id {method_id}", S::NAME),
                };
                sink.reject(Status::MethodNotFound, text);
            }
        }
    }
}

impl<S: Service, St> fmt::Debug for RpcService<S, St> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("RpcService")
            .field("service", &S::NAME)
            .field("methods", &ids)
            .finish()
    }
}

use crate::{
    address::Address,
    codec::{RequestFrame, ResponseFrame, ServerCodec},
    config::ServerConfig,
    connection::{Connection, Handler},
    error::{Error, Result},
    event_loop::EventLoop,
    service::Service,
};
use parking_lot::Mutex;
use reply::{InFlight, ReplySink};
use service::Dispatch;
use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use ulid::Ulid;

pub use reply::Reply;
pub use service::RpcService;

mod reply;
mod service;

/// Serves one [`RpcService`] on its own event loop.
pub struct Server {
    event_loop: EventLoop,
    listen_address: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    shared: Arc<Shared>,
}

struct Shared {
    dispatch: Arc<dyn Dispatch>,
    connections: Mutex<HashMap<Ulid, Connection<ResponseFrame>>>,
    shutdown: CancellationToken,
    max_frame_length: usize,
}

impl Server {
    /// Binds the listening socket. Connections are accepted once
    /// [`Server::start`] is called.
    pub fn bind<S, St>(service: RpcService<S, St>, config: ServerConfig) -> Result<Self>
    where
        S: Service,
        St: Send + Sync + 'static,
    {
        let address: Address = config.listen.parse()?;
        let event_loop = EventLoop::new(&format!("{}-server", S::NAME.to_lowercase()), config.workers)?;
        let listener = event_loop.block_on(async {
            let addr = address.resolve().await?;
            Ok::<_, Error>(TcpListener::bind(addr).await?)
        })?;
        let listen_address = listener.local_addr()?;
        info!(service = S::NAME, %listen_address, workers = event_loop.threads(), "server bound");

        Ok(Self {
            event_loop,
            listen_address,
            listener: Mutex::new(Some(listener)),
            shared: Arc::new(Shared {
                dispatch: Arc::new(service),
                connections: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                max_frame_length: config.max_frame_length,
            }),
        })
    }

    /// Starts accepting connections. Fails if already started.
    pub fn start(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "server already started"))?;
        let shared = self.shared.clone();
        self.event_loop
            .spawn(accept_loop(listener, self.listen_address, shared));
        Ok(())
    }

    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.lock().len()
    }

    /// Stops accepting, closes every accepted connection and stops the event
    /// loop. Replies completed afterwards are dropped. Must not be called
    /// from an event loop thread.
    pub fn shutdown(self) {
        self.shared.shutdown.cancel();
        self.listener.lock().take();
        let connections: Vec<_> = self.shared.connections.lock().drain().map(|(_, c)| c).collect();
        info!(
            service = self.shared.dispatch.service_name(),
            listen_address = %self.listen_address,
            connections = connections.len(),
            "server shutting down"
        );
        for conn in connections {
            conn.close();
        }
        self.event_loop.shutdown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("service", &self.shared.dispatch.service_name())
            .field("listen_address", &self.listen_address)
            .field("connections", &self.connections())
            .finish()
    }
}

#[tracing::instrument(name = "accept", skip_all, fields(%listen_address))]
async fn accept_loop(listener: TcpListener, listen_address: SocketAddr, shared: Arc<Shared>) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, remote) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%remote, error = %e, "could not set nodelay");
        }
        let handler = CallHandler {
            dispatch: shared.dispatch.clone(),
            in_flight: Arc::new(InFlight::default()),
            shared: Arc::downgrade(&shared),
        };
        Connection::spawn(
            stream,
            remote,
            ServerCodec::new(shared.max_frame_length),
            handler,
            &tokio::runtime::Handle::current(),
        );
    }
    debug!("listener closed");
}

/// Dispatches the requests of one accepted connection.
struct CallHandler {
    dispatch: Arc<dyn Dispatch>,
    in_flight: Arc<InFlight>,
    shared: Weak<Shared>,
}

impl Handler<RequestFrame, ResponseFrame> for CallHandler {
    fn on_connected(&self, conn: &Connection<ResponseFrame>) {
        info!(conn_id = %conn.id(), remote = %conn.remote_addr(), "accepted connection");
        if let Some(shared) = self.shared.upgrade() {
            shared.connections.lock().insert(conn.id(), conn.clone());
        }
    }

    fn on_frame(&self, conn: &Connection<ResponseFrame>, frame: RequestFrame) {
        let RequestFrame {
            call_id,
            method_id,
            payload,
        } = frame;
        trace!(call_id, method_id, "dispatching call");
        if !self.in_flight.begin(call_id, method_id) {
            warn!(call_id, method_id, "call id reused while still in flight");
        }
        let sink = ReplySink::new(call_id, conn.clone(), self.in_flight.clone());
        // The unwound sink has already failed the call; the connection stays up.
        let dispatched = panic::catch_unwind(AssertUnwindSafe(|| {
            self.dispatch.dispatch(method_id, payload, sink)
        }));
        if dispatched.is_err() {
            warn!(conn_id = %conn.id(), call_id, method_id, "service panicked");
        }
    }

    fn on_disconnected(&self, conn: &Connection<ResponseFrame>, cause: &Error) {
        let dropped = self.in_flight.clear();
        info!(conn_id = %conn.id(), remote = %conn.remote_addr(), dropped, %cause, "connection closed");
        if let Some(shared) = self.shared.upgrade() {
            shared.connections.lock().remove(&conn.id());
        }
    }
}

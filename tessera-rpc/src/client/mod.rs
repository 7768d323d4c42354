use crate::{
    address::Address,
    codec::{ClientCodec, RequestFrame, ResponseFrame},
    config::ClientConfig,
    connection::{Connection, Handler},
    error::{Error, Result},
    event_loop::EventLoop,
    registry::CallRegistry,
    service::Service,
};
use parking_lot::Mutex;
use rand::Rng;
use std::{fmt, io, marker::PhantomData, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpStream, runtime::Handle};
use tracing::{debug, info, warn};

pub use stub::Stub;

mod stub;

/// A connection to one remote service.
///
/// Construction connects eagerly, retrying with backoff. The connection is
/// replaced only on an explicit [`Client::refresh_stub`]; stubs handed out
/// earlier stay bound to the connection they were created on.
///
/// ```no_run
/// use tessera_rpc::{
///     CallFuture, Client, EventLoop,
///     config::ClientConfig,
///     diagnostics::{Diagnostics, DiagnosticsStub, EchoMessage},
/// };
///
/// let event_loop = EventLoop::new("client", 2).unwrap();
/// let address = "127.0.0.1:7000".parse().unwrap();
/// let client = Client::<Diagnostics>::new(address, &event_loop, ClientConfig::default()).unwrap();
///
/// let stub = DiagnosticsStub::from(client.stub());
/// let future = CallFuture::new();
/// stub.echo(future.controller(), &EchoMessage::new("hello"), future.clone());
/// assert_eq!(future.get().unwrap().message, "hello");
/// ```
pub struct Client<S> {
    address: Address,
    config: ClientConfig,
    event_loop: EventLoop,
    channel: Mutex<Channel>,
    _service: PhantomData<fn() -> S>,
}

/// One established connection and the calls pending on it.
#[derive(Clone)]
struct Channel {
    conn: Connection<RequestFrame>,
    registry: Arc<CallRegistry>,
}

impl<S: Service> Client<S> {
    /// Connects synchronously. Must not be called from an event loop thread.
    pub fn new(address: Address, event_loop: &EventLoop, config: ClientConfig) -> Result<Self> {
        event_loop.block_on(Self::connect_async(address, event_loop, config))
    }

    pub async fn connect_async(
        address: Address,
        event_loop: &EventLoop,
        config: ClientConfig,
    ) -> Result<Self> {
        let channel = connect_on(event_loop, address.clone(), config.clone()).await?;
        info!(service = S::NAME, %address, remote = %channel.conn.remote_addr(), "client connected");
        Ok(Self {
            address,
            config,
            event_loop: event_loop.clone(),
            channel: Mutex::new(channel),
            _service: PhantomData,
        })
    }

    /// A stub bound to the current connection, whatever its state.
    pub fn stub(&self) -> Stub<S> {
        Stub::new(self.channel.lock().clone())
    }

    /// Reconnects if the current connection is closed, then returns a stub
    /// bound to the live connection. Must not be called from an event loop
    /// thread.
    pub fn refresh_stub(&self) -> Result<Stub<S>> {
        if let Some(stub) = self.live_stub() {
            return Ok(stub);
        }
        let channel = self
            .event_loop
            .block_on(connect_on(&self.event_loop, self.address.clone(), self.config.clone()))?;
        Ok(self.replace(channel))
    }

    pub async fn refresh_stub_async(&self) -> Result<Stub<S>> {
        if let Some(stub) = self.live_stub() {
            return Ok(stub);
        }
        let channel =
            connect_on(&self.event_loop, self.address.clone(), self.config.clone()).await?;
        Ok(self.replace(channel))
    }

    fn live_stub(&self) -> Option<Stub<S>> {
        let channel = self.channel.lock();
        (!channel.conn.is_closed()).then(|| Stub::new(channel.clone()))
    }

    /// Installs `channel` unless a concurrent refresh already installed a
    /// live one, in which case `channel` is closed and the live one wins.
    fn replace(&self, channel: Channel) -> Stub<S> {
        let mut current = self.channel.lock();
        if !current.conn.is_closed() {
            let live = current.clone();
            drop(current);
            debug!(address = %self.address, "connection already refreshed, closing the spare");
            channel.conn.close();
            return Stub::new(live);
        }
        let previous = std::mem::replace(&mut *current, channel.clone());
        drop(current);
        info!(service = S::NAME, address = %self.address, remote = %channel.conn.remote_addr(), "client reconnected");
        previous.conn.close();
        Stub::new(channel)
    }
}

impl<S> Client<S> {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.channel.lock().conn.remote_addr()
    }

    pub fn is_connected(&self) -> bool {
        !self.channel.lock().conn.is_closed()
    }

    /// Calls sent on the current connection and not yet answered.
    pub fn pending_calls(&self) -> usize {
        self.channel.lock().registry.len()
    }

    /// Closes the current connection, failing every pending call with
    /// `ConnectionLost`.
    pub fn close(&self) {
        let channel = self.channel.lock().clone();
        channel.conn.close();
        channel
            .registry
            .drain_all(Error::connection_lost("client closed"));
    }
}

impl<S> Drop for Client<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("conn", &self.channel.lock().conn)
            .finish_non_exhaustive()
    }
}

/// Routes responses to their pending calls.
struct ResponseHandler {
    registry: Arc<CallRegistry>,
}

impl Handler<ResponseFrame, RequestFrame> for ResponseHandler {
    fn on_frame(&self, _conn: &Connection<RequestFrame>, frame: ResponseFrame) {
        let call_id = frame.call_id;
        self.registry.complete(call_id, frame.into_result());
    }

    fn on_disconnected(&self, conn: &Connection<RequestFrame>, cause: &Error) {
        let drained = self.registry.drain_all(cause.clone());
        if drained > 0 {
            warn!(conn_id = %conn.id(), remote = %conn.remote_addr(), drained, %cause, "connection lost with calls pending");
        }
    }
}

/// Runs the connect loop on the event loop so the socket belongs to its
/// reactor, whichever runtime the caller is in.
async fn connect_on(event_loop: &EventLoop, address: Address, config: ClientConfig) -> Result<Channel> {
    let handle = event_loop.handle().clone();
    event_loop
        .spawn(async move { connect(&address, &config, &handle).await })
        .await
        .map_err(|e| Error::from(io::Error::other(e)))?
}

#[tracing::instrument(skip_all, fields(%address))]
async fn connect(address: &Address, config: &ClientConfig, handle: &Handle) -> Result<Channel> {
    let attempts = config.retries.saturating_add(1);
    let timeout = config.connect_timeout_duration();
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(with_jitter(config.backoff_for(attempt - 1))).await;
        }
        match connect_once(address, timeout).await {
            Ok((stream, remote)) => {
                debug!(attempt, %remote, "connected");
                let registry = Arc::new(CallRegistry::new());
                let conn = Connection::spawn(
                    stream,
                    remote,
                    ClientCodec::new(config.max_frame_length),
                    ResponseHandler {
                        registry: registry.clone(),
                    },
                    handle,
                );
                return Ok(Channel { conn, registry });
            }
            Err(e) => {
                debug!(attempt, attempts, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    warn!(attempts, "giving up connecting");
    Err(match last_error {
        Some(Error::UnresolvedAddress(reason)) => Error::UnresolvedAddress(reason),
        other => Error::ConnectTimeout {
            address: address.to_string(),
            attempts,
            reason: other.map(|e| e.to_string()).unwrap_or_default(),
        },
    })
}

async fn connect_once(address: &Address, timeout: Duration) -> Result<(TcpStream, SocketAddr)> {
    let remote = tokio::time::timeout(timeout, address.resolve())
        .await
        .map_err(|_| Error::UnresolvedAddress(format!("{address}: lookup timed out")))??;
    let stream = tokio::time::timeout(timeout, TcpStream::connect(remote))
        .await
        .map_err(|_| Error::Timeout(timeout))??;
    stream.set_nodelay(true)?;
    Ok((stream, remote))
}

fn with_jitter(backoff: Duration) -> Duration {
    let spread = backoff.as_millis() as u64 / 4;
    backoff + Duration::from_millis(rand::rng().random_range(0..=spread))
}

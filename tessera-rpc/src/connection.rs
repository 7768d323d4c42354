use crate::error::{Error, Result};
use async_channel::{Receiver, Sender};
use derive_more::Display;
use futures::SinkExt;
use futures_lite::StreamExt;
use parking_lot::Mutex;
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    runtime::Handle,
};
use tokio_util::{
    codec::{Decoder, Encoder, FramedRead, FramedWrite},
    sync::CancellationToken,
};
use ulid::Ulid;

/// Lifecycle of a connection. `Closed` is terminal; reconnecting means
/// building a new [`Connection`].
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    Connected,
    Closed,
}

/// Receives the events of one connection.
///
/// Callbacks run on the event loop thread that drives the connection's
/// reader, so they must not block.
pub trait Handler<In, Out>: Send + Sync + 'static {
    fn on_connected(&self, _conn: &Connection<Out>) {}

    fn on_frame(&self, conn: &Connection<Out>, frame: In);

    /// Called exactly once, when the connection transitions to `Closed`.
    fn on_disconnected(&self, conn: &Connection<Out>, cause: &Error);
}

type OnDisconnected<Out> = Box<dyn FnOnce(&Connection<Out>, &Error) + Send>;

/// One duplex byte stream to a peer, carrying frames of type `Out` outwards.
///
/// Writes are queued and flushed by the event loop; [`Connection::send`]
/// never blocks. Cheap to clone.
pub struct Connection<Out> {
    inner: Arc<Inner<Out>>,
}

struct Inner<Out> {
    id: Ulid,
    remote: SocketAddr,
    state: Mutex<State>,
    outbound: Sender<Out>,
    shutdown: CancellationToken,
    on_disconnected: Mutex<Option<OnDisconnected<Out>>>,
}

impl<Out: Send + 'static> Connection<Out> {
    /// Takes over `io` and starts its reader and writer on `runtime`.
    pub fn spawn<IO, C, H>(io: IO, remote: SocketAddr, codec: C, handler: H, runtime: &Handle) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
        C: Decoder<Error = Error> + Encoder<Out, Error = Error> + Clone + Send + 'static,
        C::Item: Send,
        H: Handler<C::Item, Out>,
    {
        let handler = Arc::new(handler);
        let (sender, receiver) = async_channel::unbounded();
        let on_disconnected: OnDisconnected<Out> = {
            let handler = handler.clone();
            Box::new(move |conn, cause| handler.on_disconnected(conn, cause))
        };
        let conn = Connection {
            inner: Arc::new(Inner {
                id: Ulid::new(),
                remote,
                state: Mutex::new(State::Connecting),
                outbound: sender,
                shutdown: CancellationToken::new(),
                on_disconnected: Mutex::new(Some(on_disconnected)),
            }),
        };

        let (read_half, write_half) = tokio::io::split(io);
        *conn.inner.state.lock() = State::Connected;
        tracing::debug!(conn_id = %conn.id(), %remote, "connection established");
        handler.on_connected(&conn);

        runtime.spawn(
            conn.clone()
                .read_loop(FramedRead::new(read_half, codec.clone()), handler),
        );
        runtime.spawn(
            conn.clone()
                .write_loop(FramedWrite::new(write_half, codec), receiver),
        );
        conn
    }

    /// Queues a frame for writing.
    pub fn send(&self, frame: Out) -> Result<()> {
        if self.is_closed() {
            return Err(self.lost("connection is closed"));
        }
        self.inner
            .outbound
            .try_send(frame)
            .map_err(|_| self.lost("connection is closed"))
    }

    /// Closes the connection. Frames already queued are still written.
    pub fn close(&self) -> bool {
        self.close_with(Error::connection_lost("connection closed locally"))
    }

    fn close_with(&self, cause: Error) -> bool {
        {
            let mut state = self.inner.state.lock();
            if *state == State::Closed {
                return false;
            }
            *state = State::Closed;
        }
        tracing::debug!(conn_id = %self.id(), remote = %self.remote_addr(), %cause, "connection closed");

        self.inner.outbound.close();
        self.inner.shutdown.cancel();
        let on_disconnected = self.inner.on_disconnected.lock().take();
        if let Some(on_disconnected) = on_disconnected {
            on_disconnected(self, &cause);
        }
        true
    }

    #[tracing::instrument(name = "conn_read", skip_all, fields(conn_id = %self.id(), remote = %self.remote_addr()))]
    async fn read_loop<R, C, H>(self, mut frames: FramedRead<R, C>, handler: Arc<H>)
    where
        R: AsyncRead + Unpin,
        C: Decoder<Error = Error>,
        H: Handler<C::Item, Out>,
    {
        let _guard = CloseOnExit(&self);
        let cause = loop {
            let next = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => return,
                next = frames.next() => next,
            };
            match next {
                Some(Ok(frame)) => {
                    if self.is_closed() {
                        return;
                    }
                    handler.on_frame(&self, frame);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "read failed");
                    break self.lost(e.to_string());
                }
                None => break self.lost("peer closed the connection"),
            }
        };
        self.close_with(cause);
    }

    #[tracing::instrument(name = "conn_write", skip_all, fields(conn_id = %self.id(), remote = %self.remote_addr()))]
    async fn write_loop<W, C>(self, mut sink: FramedWrite<W, C>, outbound: Receiver<Out>)
    where
        W: AsyncWrite + Unpin,
        C: Encoder<Out, Error = Error>,
    {
        while let Ok(frame) = outbound.recv().await {
            let written = match sink.feed(frame).await {
                Ok(()) if outbound.is_empty() => sink.flush().await,
                other => other,
            };
            if let Err(e) = written {
                tracing::warn!(error = %e, "write failed");
                self.close_with(self.lost(e.to_string()));
                return;
            }
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "shutdown after close failed");
        }
    }
}

/// Closes the connection when the reader ends without doing so itself, such
/// as when a handler panics and the task unwinds.
struct CloseOnExit<'a, Out: Send + 'static>(&'a Connection<Out>);

impl<Out: Send + 'static> Drop for CloseOnExit<'_, Out> {
    fn drop(&mut self) {
        if !self.0.is_closed() {
            tracing::warn!(conn_id = %self.0.id(), "reader aborted");
            self.0.close_with(self.0.lost("reader aborted"));
        }
    }
}

impl<Out> Connection<Out> {
    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote
    }

    pub fn state(&self) -> State {
        *self.inner.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    fn lost(&self, reason: impl fmt::Display) -> Error {
        Error::connection_lost(format!("{}: {}", self.inner.remote, reason))
    }
}

impl<Out> Clone for Connection<Out> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Out> fmt::Debug for Connection<Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("state", &self.state())
            .finish()
    }
}

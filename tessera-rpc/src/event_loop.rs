use crate::error::Result;
use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::runtime::{Builder, Handle, Runtime};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A fixed pool of I/O threads shared by every connection spawned on it.
///
/// Clones share the pool. Blocking entry points (`block_on`, `shutdown`)
/// must be called from outside the pool's own threads.
#[derive(Clone)]
pub struct EventLoop {
    name: Arc<str>,
    threads: usize,
    runtime: Arc<Runtime>,
}

impl EventLoop {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let thread_prefix = name.to_string();
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name_fn(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                format!("{thread_prefix}-io-{n}")
            })
            .enable_all()
            .build()?;
        tracing::debug!(name, threads, "event loop started");
        Ok(Self {
            name: Arc::from(name),
            threads,
            runtime: Arc::new(runtime),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Stops the pool once this is the last clone; otherwise only drops this
    /// handle.
    pub fn shutdown(self) {
        match Arc::try_unwrap(self.runtime) {
            Ok(runtime) => {
                tracing::debug!(name = %self.name, "event loop stopping");
                runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
            }
            Err(_) => tracing::trace!(name = %self.name, "event loop still shared"),
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("threads", &self.threads)
            .finish()
    }
}

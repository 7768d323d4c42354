use crate::{
    codec::decode_payload,
    controller::Controller,
    error::{Error, Result},
    future::Callback,
};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

type Completion = Box<dyn FnOnce(Result<Bytes>, &Controller) + Send>;

/// A call that has been sent (or is about to be) and awaits its response.
pub struct PendingCall {
    method_id: u32,
    controller: Controller,
    completion: Completion,
    created_at: Instant,
}

impl PendingCall {
    /// Wraps a typed callback. The raw response payload is decoded as
    /// `Option<T>` when the call completes.
    pub fn new<T, C>(method_id: u32, controller: Controller, done: C) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        C: Callback<T>,
    {
        let completion = move |result: Result<Bytes>, controller: &Controller| {
            match result.and_then(|bytes| decode_payload::<Option<T>>(&bytes)) {
                Ok(response) => {
                    controller.succeed();
                    done.run(response, controller);
                }
                Err(e) => {
                    controller.fail(e);
                    done.run(None, controller);
                }
            }
        };
        Self {
            method_id,
            controller,
            completion: Box::new(completion),
            created_at: Instant::now(),
        }
    }

    pub fn method_id(&self) -> u32 {
        self.method_id
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn finish(self, result: Result<Bytes>) {
        (self.completion)(result, &self.controller)
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("method_id", &self.method_id)
            .field("elapsed", &self.elapsed())
            .finish_non_exhaustive()
    }
}

/// Maps call ids to pending calls for one connection.
///
/// Each registered call is completed exactly once: by [`complete`] when its
/// response arrives, or by [`drain_all`] when the connection goes away.
/// Completing an id that is no longer registered does nothing.
///
/// [`complete`]: CallRegistry::complete
/// [`drain_all`]: CallRegistry::drain_all
#[derive(Debug)]
pub struct CallRegistry {
    next_id: AtomicU32,
    calls: Mutex<Calls>,
}

#[derive(Debug, Default)]
struct Calls {
    pending: HashMap<u32, PendingCall>,
    /// Set by the first drain; later registrations fail with it at once.
    closed: Option<Error>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first_id: u32) -> Self {
        Self {
            next_id: AtomicU32::new(first_id),
            calls: Mutex::new(Calls::default()),
        }
    }

    /// Stores the call under a fresh id.
    ///
    /// Returns `None` after the registry has been drained; the call has then
    /// already been failed with the drain error.
    pub fn register(&self, call: PendingCall) -> Option<u32> {
        let mut calls = self.calls.lock();
        if let Some(error) = calls.closed.clone() {
            drop(calls);
            tracing::debug!(method_id = call.method_id, "registry closed, failing call");
            call.finish(Err(error));
            return None;
        }

        // Ids wrap around; skip any that are still outstanding.
        let call_id = loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if !calls.pending.contains_key(&id) {
                break id;
            }
        };
        tracing::trace!(call_id, method_id = call.method_id, "registered call");
        calls.pending.insert(call_id, call);
        Some(call_id)
    }

    /// Completes and removes the call. Returns `false` for unknown ids.
    pub fn complete(&self, call_id: u32, result: Result<Bytes>) -> bool {
        let call = self.calls.lock().pending.remove(&call_id);
        match call {
            Some(call) => {
                tracing::trace!(
                    call_id,
                    method_id = call.method_id,
                    elapsed = ?call.elapsed(),
                    ok = result.is_ok(),
                    "completing call"
                );
                call.finish(result);
                true
            }
            None => {
                tracing::debug!(call_id, "no pending call for response, dropping it");
                false
            }
        }
    }

    /// Fails every remaining call with `error` and refuses new ones.
    pub fn drain_all(&self, error: Error) -> usize {
        let drained: Vec<_> = {
            let mut calls = self.calls.lock();
            calls.closed.get_or_insert_with(|| error.clone());
            calls.pending.drain().collect()
        };
        let count = drained.len();
        if count > 0 {
            tracing::debug!(count, %error, "draining pending calls");
        }
        for (_, call) in drained {
            call.finish(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.calls.lock().closed.is_some()
    }

    /// Sorted ids of outstanding calls.
    pub fn pending_call_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.calls.lock().pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

use crate::error::{Error, ErrorKind};
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

/// Per-call error and cancellation state.
///
/// A controller starts unset and is settled exactly once, by whichever path
/// completes the call. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct Controller {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// `None` inside the cell means the call succeeded.
    outcome: OnceLock<Option<Error>>,
    canceled: AtomicBool,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the call has completed, successfully or not.
    pub fn is_done(&self) -> bool {
        self.inner.outcome.get().is_some()
    }

    pub fn failed(&self) -> bool {
        matches!(self.inner.outcome.get(), Some(Some(_)))
    }

    pub fn error(&self) -> Option<&Error> {
        self.inner.outcome.get().and_then(Option::as_ref)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(Error::kind)
    }

    pub fn error_text(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }

    /// Marks the call as abandoned by the caller. Nothing is sent to the
    /// peer; a response that still arrives completes the call normally.
    pub fn start_cancel(&self) {
        self.inner.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn succeed(&self) -> bool {
        self.inner.outcome.set(None).is_ok()
    }

    pub(crate) fn fail(&self, error: Error) -> bool {
        self.inner.outcome.set(Some(error)).is_ok()
    }

    /// Copies the outcome of a settled controller into this one.
    pub(crate) fn adopt(&self, other: &Controller) -> bool {
        match other.inner.outcome.get() {
            Some(None) => self.succeed(),
            Some(Some(error)) => self.fail(error.clone()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settles_once() {
        let controller = Controller::new();
        assert!(!controller.is_done());
        assert!(!controller.failed());
        assert_eq!(controller.error_text(), None);

        assert!(controller.fail(Error::connection_lost("peer reset")));
        assert!(!controller.succeed());
        assert!(!controller.fail(Error::Application("late".into())));

        assert!(controller.is_done());
        assert!(controller.failed());
        assert_eq!(controller.error_kind(), Some(ErrorKind::ConnectionLost));
        assert_eq!(
            controller.error_text().as_deref(),
            Some("connection lost: peer reset")
        );
    }

    #[test]
    fn clones_share_state() {
        let controller = Controller::new();
        let observer = controller.clone();
        assert!(controller.succeed());
        assert!(observer.is_done());
        assert!(!observer.failed());
    }

    #[test]
    fn adopt_copies_outcome() {
        let settled = Controller::new();
        let other = Controller::new();
        assert!(!other.adopt(&settled));

        settled.fail(Error::Timeout(std::time::Duration::from_secs(1)));
        assert!(other.adopt(&settled));
        assert_eq!(other.error_kind(), Some(ErrorKind::Timeout));
        assert!(!settled.adopt(&settled));
    }

    #[test]
    fn cancel_is_local_only() {
        let controller = Controller::new();
        controller.start_cancel();
        assert!(controller.is_canceled());
        assert!(!controller.is_done());
    }
}

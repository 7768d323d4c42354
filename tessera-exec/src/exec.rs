use crate::{datum::Tuple, error::Result, schema::Schema};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A pull-based (volcano) operator.
pub trait PhysicalExec: Send {
    fn schema(&self) -> &Schema;

    /// The next tuple, or `None` at end of stream.
    fn next(&mut self) -> Result<Option<Tuple>>;

    /// Restarts the stream from the beginning.
    fn rescan(&mut self) -> Result<()>;
}

impl<T: PhysicalExec + ?Sized> PhysicalExec for Box<T> {
    fn schema(&self) -> &Schema {
        (**self).schema()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        (**self).next()
    }

    fn rescan(&mut self) -> Result<()> {
        (**self).rescan()
    }
}

/// State shared by every operator of one running plan fragment.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    stopped: Arc<AtomicBool>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every operator to end its stream early.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Drains `exec` into a vector.
pub fn collect(exec: &mut dyn PhysicalExec) -> Result<Vec<Tuple>> {
    let mut tuples = Vec::new();
    while let Some(tuple) = exec.next()? {
        tuples.push(tuple);
    }
    Ok(tuples)
}

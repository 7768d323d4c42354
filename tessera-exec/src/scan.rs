use crate::{
    datum::Tuple,
    error::{ExecError, Result},
    exec::PhysicalExec,
    schema::Schema,
};

/// Scans tuples held in memory.
#[derive(Debug, Clone)]
pub struct MemScanExec {
    schema: Schema,
    tuples: Vec<Tuple>,
    pos: usize,
}

impl MemScanExec {
    /// Fails if a tuple's arity differs from the schema.
    pub fn new(schema: Schema, tuples: Vec<Tuple>) -> Result<Self> {
        if let Some(bad) = tuples.iter().find(|t| t.len() != schema.len()) {
            return Err(ExecError::ArityMismatch {
                expected: schema.len(),
                found: bad.len(),
            });
        }
        Ok(Self {
            schema,
            tuples,
            pos: 0,
        })
    }
}

impl PhysicalExec for MemScanExec {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let tuple = self.tuples.get(self.pos).cloned();
        if tuple.is_some() {
            self.pos += 1;
        }
        Ok(tuple)
    }

    fn rescan(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }
}

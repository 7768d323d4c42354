//! Physical operators of the tessera query engine.

pub mod aggregate;
pub mod datum;
pub mod error;
pub mod exec;
pub mod scan;
pub mod schema;
#[cfg(test)]
mod tests;

pub use aggregate::{AggFunc, OutputColumn, SortAggregateExec};
pub use datum::{DataType, Datum, Tuple};
pub use error::{ExecError, Result};
pub use exec::{ExecContext, PhysicalExec, collect};
pub use scan::MemScanExec;
pub use schema::{Column, Schema};

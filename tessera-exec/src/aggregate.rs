use crate::{
    datum::{DataType, Datum, Tuple},
    error::{ExecError, Result},
    exec::{ExecContext, PhysicalExec},
    schema::{Column, Schema},
};
use derive_more::Display;
use std::cmp::Ordering;
use tracing::{debug, trace};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    #[display("count")]
    Count,
    #[display("sum")]
    Sum,
    #[display("min")]
    Min,
    #[display("max")]
    Max,
    #[display("avg")]
    Avg,
}

/// One column of the aggregate's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputColumn {
    /// An input column that is also a grouping key.
    Key(usize),
    /// `func(column)`; `column == None` means `count(*)`.
    Agg { func: AggFunc, column: Option<usize> },
}

impl OutputColumn {
    pub fn count_star() -> Self {
        OutputColumn::Agg {
            func: AggFunc::Count,
            column: None,
        }
    }

    pub fn agg(func: AggFunc, column: usize) -> Self {
        OutputColumn::Agg {
            func,
            column: Some(column),
        }
    }
}

/// Running state of one aggregate within the current group.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum(Datum),
    Min(Datum),
    Max(Datum),
    Avg { sum: f64, count: i64 },
}

impl Accumulator {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count(0),
            AggFunc::Sum => Accumulator::Sum(Datum::Null),
            AggFunc::Min => Accumulator::Min(Datum::Null),
            AggFunc::Max => Accumulator::Max(Datum::Null),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
        }
    }

    /// Folds one input value in. `None` is a `count(*)` row; nulls are
    /// skipped by every other aggregate.
    fn update(&mut self, value: Option<&Datum>) -> Result<()> {
        let value = match value {
            None => {
                if let Accumulator::Count(n) = self {
                    *n += 1;
                }
                return Ok(());
            }
            Some(Datum::Null) => return Ok(()),
            Some(value) => value,
        };
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum(acc) if acc.is_null() => *acc = numeric("sum", value)?.clone(),
            Accumulator::Sum(acc) => *acc = acc.add(value)?,
            Accumulator::Min(acc) => keep_if(acc, value, Ordering::Less)?,
            Accumulator::Max(acc) => keep_if(acc, value, Ordering::Greater)?,
            Accumulator::Avg { sum, count } => {
                *sum += numeric("avg", value)?.as_f64().unwrap_or_default();
                *count += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Datum {
        match self {
            Accumulator::Count(n) => Datum::Int8(n),
            Accumulator::Sum(acc) | Accumulator::Min(acc) | Accumulator::Max(acc) => acc,
            Accumulator::Avg { count: 0, .. } => Datum::Null,
            Accumulator::Avg { sum, count } => Datum::Float8(sum / count as f64),
        }
    }
}

fn numeric<'a>(op: &str, value: &'a Datum) -> Result<&'a Datum> {
    match value.data_type() {
        Some(ty) if ty.is_numeric() => Ok(value),
        Some(ty) => Err(ExecError::mismatch(op, ty.to_string())),
        None => Err(ExecError::mismatch(op, "NULL")),
    }
}

fn keep_if(acc: &mut Datum, value: &Datum, wanted: Ordering) -> Result<()> {
    if acc.is_null() || value.compare(acc)? == wanted {
        *acc = value.clone();
    }
    Ok(())
}

/// The group being accumulated.
#[derive(Debug)]
struct Group {
    key: Tuple,
    /// Output values for key columns, accumulators for the rest.
    slots: Vec<Slot>,
}

#[derive(Debug)]
enum Slot {
    Key(Datum),
    Agg(Accumulator, Option<usize>),
}

impl Group {
    fn start(key: Tuple, outputs: &[OutputColumn], tuple: &Tuple) -> Result<Self> {
        let slots = outputs
            .iter()
            .map(|output| match *output {
                OutputColumn::Key(column) => Slot::Key(tuple[column].clone()),
                OutputColumn::Agg { func, column } => Slot::Agg(Accumulator::new(func), column),
            })
            .collect();
        let mut group = Group { key, slots };
        group.update(tuple)?;
        Ok(group)
    }

    fn update(&mut self, tuple: &Tuple) -> Result<()> {
        for slot in &mut self.slots {
            if let Slot::Agg(acc, column) = slot {
                acc.update(column.map(|c| &tuple[c]))?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Tuple {
        self.slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Key(datum) => datum,
                Slot::Agg(acc, _) => acc.finish(),
            })
            .collect()
    }
}

/// Sort-based group-by over a child already ordered on the grouping keys.
///
/// Single pass: one output tuple per run of equal keys, in input order.
/// Without grouping keys the whole input forms one group. An empty input
/// produces no rows.
pub struct SortAggregateExec<C> {
    ctx: ExecContext,
    child: C,
    keys: Vec<usize>,
    outputs: Vec<OutputColumn>,
    schema: Schema,
    current: Option<Group>,
}

impl<C: PhysicalExec> SortAggregateExec<C> {
    pub fn new(ctx: ExecContext, child: C, keys: Vec<usize>, outputs: Vec<OutputColumn>) -> Result<Self> {
        let input = child.schema();
        for &key in &keys {
            input.column(key)?;
        }
        let schema = outputs
            .iter()
            .map(|output| output_column(input, &keys, output))
            .collect::<Result<Schema>>()?;
        debug!(?keys, columns = schema.len(), "sort aggregate planned");
        Ok(Self {
            ctx,
            child,
            keys,
            outputs,
            schema,
            current: None,
        })
    }

    fn key_of(&self, tuple: &Tuple) -> Result<Tuple> {
        if tuple.len() != self.child.schema().len() {
            return Err(ExecError::ArityMismatch {
                expected: self.child.schema().len(),
                found: tuple.len(),
            });
        }
        Ok(self.keys.iter().map(|&k| tuple[k].clone()).collect())
    }
}

fn output_column(input: &Schema, keys: &[usize], output: &OutputColumn) -> Result<Column> {
    match *output {
        OutputColumn::Key(column) => {
            if !keys.contains(&column) {
                return Err(ExecError::NotGrouped(column));
            }
            Ok(input.column(column)?.clone())
        }
        OutputColumn::Agg {
            func: AggFunc::Count,
            column: None,
        } => Ok(Column::new("count(*)", DataType::Int8)),
        OutputColumn::Agg { func, column: None } => Err(ExecError::mismatch(func.to_string(), "*")),
        OutputColumn::Agg {
            func,
            column: Some(column),
        } => {
            let source = input.column(column)?;
            let data_type = match func {
                AggFunc::Count => DataType::Int8,
                AggFunc::Avg => DataType::Float8,
                AggFunc::Min | AggFunc::Max => source.data_type,
                AggFunc::Sum => source.data_type,
            };
            if matches!(func, AggFunc::Sum | AggFunc::Avg) && !source.data_type.is_numeric() {
                return Err(ExecError::mismatch(func.to_string(), source.data_type.to_string()));
            }
            Ok(Column::new(format!("{func}({})", source.name), data_type))
        }
    }
}

impl<C: PhysicalExec> PhysicalExec for SortAggregateExec<C> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while !self.ctx.is_stopped() {
            let Some(tuple) = self.child.next()? else {
                return Ok(self.current.take().map(Group::finish));
            };
            let key = self.key_of(&tuple)?;
            if let Some(group) = self.current.as_mut().filter(|g| g.key == key) {
                group.update(&tuple)?;
                continue;
            }
            let group = Group::start(key, &self.outputs, &tuple)?;
            if let Some(finished) = self.current.replace(group) {
                trace!(key = ?finished.key, "group complete");
                return Ok(Some(finished.finish()));
            }
        }
        debug!("stopped, discarding the pending group");
        self.current = None;
        Ok(None)
    }

    fn rescan(&mut self) -> Result<()> {
        self.current = None;
        self.child.rescan()
    }
}

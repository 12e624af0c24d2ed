//! Split routing: per-column predicates deciding which destination
//! receives which rows, composable with AND/OR.

use std::io::Write;

use crate::export::error::ExportError;
use crate::export::value::{DynamicValue, NativeValue};

/// Decides, one column at a time, whether a destination should receive the
/// current row.
///
/// Splitters are column-scoped filters, not whole-row filters: a splitter
/// bound to column C must answer include when asked about any other column.
pub trait Splitter {
    fn should_include(&self, column: &str, value: &DynamicValue) -> Result<bool, ExportError>;
}

/// Predicate bound to a single column with a typed native test.
///
/// The value's kind is checked against `T` before the test runs; a mismatch
/// is a hard error, with the single int/float widening exception (a float
/// with no fractional part passes an int-typed test).
pub struct ColumnSplit {
    column: String,
    include: Box<dyn Fn(&DynamicValue) -> Result<bool, ExportError>>,
}

impl ColumnSplit {
    pub fn new<T, F>(column: impl Into<String>, include: F) -> Self
    where
        T: NativeValue,
        F: Fn(T) -> bool + 'static,
    {
        ColumnSplit {
            column: column.into(),
            include: Box::new(move |value: &DynamicValue| {
                match T::from_value_widened(value) {
                    Some(native) => Ok(include(native)),
                    None => Err(ExportError::SplitTypeMismatch {
                        expected: T::KIND,
                        actual: value.kind(),
                    }),
                }
            }),
        }
    }
}

impl Splitter for ColumnSplit {
    fn should_include(&self, column: &str, value: &DynamicValue) -> Result<bool, ExportError> {
        if self.column != column {
            return Ok(true);
        }
        (self.include)(value)
    }
}

/// Identity splitter: every row is included.
struct NoSplit;

impl Splitter for NoSplit {
    fn should_include(&self, _column: &str, _value: &DynamicValue) -> Result<bool, ExportError> {
        Ok(true)
    }
}

enum SplitOp {
    All,
    Any,
}

/// AND/OR composition of splitters. An empty set includes everything;
/// AND short-circuits on the first exclude, OR on the first include.
struct CompositeSplit {
    splitters: Vec<Box<dyn Splitter>>,
    op: SplitOp,
}

impl Splitter for CompositeSplit {
    fn should_include(&self, column: &str, value: &DynamicValue) -> Result<bool, ExportError> {
        if self.splitters.is_empty() {
            return Ok(true);
        }

        for splitter in &self.splitters {
            let include = splitter.should_include(column, value)?;
            match self.op {
                SplitOp::All if !include => return Ok(false),
                SplitOp::Any if include => return Ok(true),
                _ => {}
            }
        }

        Ok(matches!(self.op, SplitOp::All))
    }
}

/// One export target: a CSV writer over a byte sink plus the splitter
/// guarding it.
pub struct Destination<'a> {
    writer: csv::Writer<Box<dyn Write + 'a>>,
    splitter: Box<dyn Splitter + 'a>,
}

impl<'a> Destination<'a> {
    /// Destination that receives every row.
    pub fn no_split(writer: impl Write + 'a) -> Self {
        Self::with_splitter(writer, NoSplit)
    }

    /// Destination guarded by a single typed column predicate.
    pub fn split<T, F>(writer: impl Write + 'a, column: impl Into<String>, include: F) -> Self
    where
        T: NativeValue,
        F: Fn(T) -> bool + 'static,
    {
        Self::with_splitter(writer, ColumnSplit::new(column, include))
    }

    /// Destination guarded by AND across `splitters`; an empty list
    /// includes everything.
    pub fn split_and(writer: impl Write + 'a, splitters: Vec<Box<dyn Splitter>>) -> Self {
        Self::with_splitter(
            writer,
            CompositeSplit {
                splitters,
                op: SplitOp::All,
            },
        )
    }

    /// Destination guarded by OR across `splitters`; an empty list
    /// includes everything.
    pub fn split_or(writer: impl Write + 'a, splitters: Vec<Box<dyn Splitter>>) -> Self {
        Self::with_splitter(
            writer,
            CompositeSplit {
                splitters,
                op: SplitOp::Any,
            },
        )
    }

    /// Destination guarded by an arbitrary [`Splitter`].
    pub fn with_splitter(writer: impl Write + 'a, splitter: impl Splitter + 'a) -> Self {
        Destination {
            writer: csv::Writer::from_writer(Box::new(writer)),
            splitter: Box::new(splitter),
        }
    }

    pub(crate) fn should_include(
        &self,
        column: &str,
        value: &DynamicValue,
    ) -> Result<bool, ExportError> {
        self.splitter.should_include(column, value)
    }

    pub(crate) fn write_record<I, T>(&mut self, record: I) -> Result<(), ExportError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer.write_record(record)?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), ExportError> {
        self.writer.flush()?;
        Ok(())
    }
}

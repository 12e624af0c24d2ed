//! Dynamic-value flattening and CSV export.
//!
//! This module turns semi-structured data (one object, an array, an array
//! of objects or a lazily-decoded stream of objects) into delimited text:
//! a caller-supplied flattener maps each record onto named columns, and the
//! pipeline serializes the resulting rows to one or more destinations,
//! optionally routing rows through per-column split predicates.
//!
//! ## Pipeline shape
//!
//! Row generation runs on a background thread behind a bounded channel, so
//! serialization starts before generation finishes and memory stays capped
//! for large inputs.

pub mod error;
pub mod format;
pub mod pipeline;
pub mod row;
pub mod splits;
pub mod value;

pub use error::ExportError;
pub use format::{formatter, safe_formatter, Formatter};
pub use pipeline::{CsvExport, Flattener};
pub use row::{Dest, Source};
pub use splits::{ColumnSplit, Destination, Splitter};
pub use value::{DataKind, DynamicValue, NativeValue, ERROR_VALUE};

//! # Flatiron - JSON to CSV Export Engine
//!
//! A library for flattening semi-structured JSON into CSV, with typed
//! per-column formatters and multi-destination split routing.
//!
//! ## Modules
//!
//! - **export**: the dynamic value model, row generation and the CSV
//!   pipeline
//!
//! ## Quick Start
//!
//! ### Flattening a document
//!
//! ```rust
//! use flatiron::DynamicValue;
//!
//! # fn main() -> Result<(), flatiron::ExportError> {
//! let input = r#"[
//!     {"name": "John", "age": 30},
//!     {"name": "Jane", "age": 25}
//! ]"#;
//!
//! let csv = DynamicValue::read_json(input.as_bytes()).into_csv(|s, d| {
//!     d.col("name", s.key(&["name"]));
//!     d.col("age", s.key(&["age"]));
//! });
//!
//! let mut out = Vec::new();
//! csv.export(&mut out)?;
//! assert_eq!(out, b"name,age\nJohn,30\nJane,25\n");
//! # Ok(())
//! # }
//! ```
//!
//! ### Routing rows to split destinations
//!
//! ```rust
//! use flatiron::{Destination, DynamicValue};
//!
//! # fn main() -> Result<(), flatiron::ExportError> {
//! let input = r#"[{"name": "John", "age": 30}, {"name": "Jane", "age": 25}]"#;
//! let csv = DynamicValue::read_json(input.as_bytes()).into_csv(|s, d| {
//!     d.col("name", s.key(&["name"]));
//!     d.col("age", s.key(&["age"]));
//! });
//!
//! let (mut over, mut under) = (Vec::new(), Vec::new());
//! csv.export_split(vec![
//!     Destination::split(&mut over, "age", |age: i64| age >= 30),
//!     Destination::split(&mut under, "age", |age: i64| age < 30),
//! ])?;
//!
//! assert_eq!(over, b"name,age\nJohn,30\n");
//! assert_eq!(under, b"name,age\nJane,25\n");
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};

pub mod export;

// Re-export commonly used types for convenience
pub use export::{
    formatter, safe_formatter, ColumnSplit, CsvExport, DataKind, Dest, Destination, DynamicValue,
    ExportError, Flattener, Formatter, NativeValue, Source, Splitter,
};

/// Main entry point: decode one JSON document and export it as CSV.
pub fn export_json_to_csv<R: Read, W: Write>(
    reader: R,
    writer: W,
    flattener: impl Fn(&Source, &mut dyn Dest) + Send + Sync + 'static,
) -> Result<(), ExportError> {
    DynamicValue::read_json(reader)
        .into_csv(flattener)
        .export(writer)
}

/// Export a stream of whitespace-separated JSON objects (NDJSON) as CSV,
/// decoding lazily so unbounded inputs stay bounded in memory.
pub fn export_json_stream_to_csv<R: Read + Send + 'static, W: Write>(
    reader: R,
    writer: W,
    flattener: impl Fn(&Source, &mut dyn Dest) + Send + Sync + 'static,
) -> Result<(), ExportError> {
    DynamicValue::stream_json(reader)
        .into_csv(flattener)
        .export(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_json_to_csv() {
        let input = r#"{"name": "John", "age": 30}"#;
        let mut out = Vec::new();

        export_json_to_csv(input.as_bytes(), &mut out, |s, d| {
            d.col("name", s.key(&["name"]));
            d.col("age", s.key(&["age"]));
        })
        .unwrap();

        assert_eq!(out, b"name,age\nJohn,30\n");
    }

    #[test]
    fn test_export_json_stream_to_csv() {
        let input = "{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n";
        let mut out = Vec::new();

        export_json_stream_to_csv(input.as_bytes(), &mut out, |s, d| {
            d.col("id", s.key(&["id"]));
        })
        .unwrap();

        assert_eq!(out, b"id\n1\n2\n3\n");
    }
}

//! CSV export pipeline.
//!
//! Row generation runs on a scoped producer thread and feeds a bounded
//! channel; the calling thread consumes rows, evaluates split predicates
//! and serializes. The channel bound is the backpressure knob: generation
//! blocks once ~100 rows are in flight, which caps memory for large arrays
//! and unbounded streams.

use std::io::Write;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::export::error::ExportError;
use crate::export::row::{Dest, Row, Source};
use crate::export::splits::Destination;
use crate::export::value::{DataKind, DynamicValue, Payload};

/// Bound on in-flight rows between generation and serialization.
const ROW_BUFFER: usize = 100;

/// Root kinds that can drive row generation.
const ROOT_KINDS: [DataKind; 4] = [
    DataKind::Object,
    DataKind::Array,
    DataKind::ArrayOfObjects,
    DataKind::StreamOfObjects,
];

/// Caller-supplied mapping from one record's [`Source`] to named columns.
pub type Flattener = Box<dyn Fn(&Source, &mut dyn Dest) + Send + Sync>;

/// A root value bound to a flattener, ready to export.
///
/// Construction validates the root: a value carrying an error, or whose
/// kind is not exportable, puts the instance in a permanent error state
/// and every subsequent export call returns that error without writing
/// a single byte.
pub struct CsvExport {
    root: DynamicValue,
    flattener: Flattener,
    err: Option<ExportError>,
}

impl CsvExport {
    pub fn new(
        root: DynamicValue,
        flattener: impl Fn(&Source, &mut dyn Dest) + Send + Sync + 'static,
    ) -> Self {
        if let Some(err) = root.error() {
            return Self::from_error(err.clone());
        }
        if !ROOT_KINDS.contains(&root.kind()) {
            return Self::from_error(ExportError::UnsupportedRoot(root.kind()));
        }

        CsvExport {
            root,
            flattener: Box::new(flattener),
            err: None,
        }
    }

    fn from_error(err: ExportError) -> Self {
        CsvExport {
            root: DynamicValue::null(),
            flattener: Box::new(|_, _| {}),
            err: Some(err),
        }
    }

    /// Exports every row to a single destination.
    pub fn export(&self, writer: impl Write) -> Result<(), ExportError> {
        self.export_split(vec![Destination::no_split(writer)])
    }

    /// Exports rows to multiple destinations, each guarded by its splitter.
    ///
    /// The header line is written to every destination exactly once, before
    /// any data line. Rows are routed in generation order; a predicate
    /// error, a render error or a write error aborts the whole export, and
    /// rows already written stay written.
    pub fn export_split(&self, mut destinations: Vec<Destination<'_>>) -> Result<(), ExportError> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }

        debug!(
            root = %self.root.kind(),
            destinations = destinations.len(),
            "starting CSV export"
        );

        thread::scope(|scope| {
            let (tx, rx) = sync_channel::<Result<Row, ExportError>>(ROW_BUFFER);
            scope.spawn(move || self.stream_rows(tx));

            // consume_rows owns the receiver: when it returns early on an
            // error, the dropped receiver unblocks the producer, which then
            // bails out on its next send.
            self.consume_rows(rx, &mut destinations)
        })
    }

    /// Producer side: one row per logical record, headers flagged on the
    /// first record only.
    fn stream_rows(&self, tx: SyncSender<Result<Row, ExportError>>) {
        match self.root.payload() {
            Payload::Object(map) => {
                let row = self.flatten(DynamicValue::from(Value::Object(map.clone())), true);
                let _ = tx.send(Ok(row));
            }
            Payload::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let row = self.flatten(DynamicValue::from(item.clone()), i == 0);
                    if tx.send(Ok(row)).is_err() {
                        return;
                    }
                }
            }
            Payload::ArrayOfObjects(items) => {
                for (i, item) in items.iter().enumerate() {
                    let row = self.flatten(DynamicValue::from(Value::Object(item.clone())), i == 0);
                    if tx.send(Ok(row)).is_err() {
                        return;
                    }
                }
            }
            Payload::Stream(_) => {
                let Some(reader) = self.root.take_stream() else {
                    // Stream already consumed by an earlier export.
                    return;
                };

                let stream =
                    serde_json::Deserializer::from_reader(reader).into_iter::<Map<String, Value>>();

                let mut with_headers = true;
                for item in stream {
                    match item {
                        Ok(object) => {
                            let row =
                                self.flatten(DynamicValue::from(Value::Object(object)), with_headers);
                            if tx.send(Ok(row)).is_err() {
                                return;
                            }
                            with_headers = false;
                        }
                        Err(err) => {
                            let _ = tx.send(Err(ExportError::Decode(err.to_string())));
                            return;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn flatten(&self, value: DynamicValue, with_headers: bool) -> Row {
        let source = Source::new(value);
        let mut row = Row::new(with_headers);
        (self.flattener)(&source, &mut row);
        row
    }

    /// Consumer side: header bookkeeping, split routing and serialization.
    fn consume_rows(
        &self,
        rx: Receiver<Result<Row, ExportError>>,
        destinations: &mut [Destination<'_>],
    ) -> Result<(), ExportError> {
        let mut headers: Vec<String> = Vec::new();
        let mut written = 0usize;

        for message in rx {
            let row = message?;

            if row.has_headers() {
                headers = row.headers().to_vec();
                for dest in destinations.iter_mut() {
                    dest.write_record(&headers)?;
                }
            }

            for dest in destinations.iter_mut() {
                if !row_included(dest, &headers, &row)? {
                    trace!("row excluded by split");
                    continue;
                }

                let mut fields = Vec::with_capacity(headers.len());
                for header in &headers {
                    match row.get(header) {
                        Some(source) => {
                            let field = source.render().map_err(|err| ExportError::Column {
                                column: header.clone(),
                                source: Box::new(err),
                            })?;
                            fields.push(field);
                        }
                        // Columns absent from this row render empty.
                        None => fields.push(String::new()),
                    }
                }

                dest.write_record(&fields)?;
                written += 1;
            }
        }

        for dest in destinations.iter_mut() {
            dest.flush()?;
        }

        debug!(records = written, "CSV export finished");
        Ok(())
    }
}

/// Evaluates a destination's splitter against every declared header column
/// of the row; the first exclusion skips the row for this destination only.
fn row_included(
    dest: &Destination<'_>,
    headers: &[String],
    row: &Row,
) -> Result<bool, ExportError> {
    let null = DynamicValue::null();
    for header in headers {
        let value = row.get(header).map(|s| s.value()).unwrap_or(&null);
        if !dest.should_include(header, value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

impl DynamicValue {
    /// Binds this value to a flattener for CSV export.
    pub fn into_csv(
        self,
        flattener: impl Fn(&Source, &mut dyn Dest) + Send + Sync + 'static,
    ) -> CsvExport {
        CsvExport::new(self, flattener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::format::safe_formatter;
    use crate::export::splits::ColumnSplit;
    use serde_json::json;

    fn name_age(s: &Source, d: &mut dyn Dest) {
        d.col("name", s.key(&["name"]));
        d.col("age", s.key(&["age"]));
    }

    fn export_to_string(csv: &CsvExport) -> String {
        let mut buf = Vec::new();
        csv.export(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_simple_export() {
        let csv = DynamicValue::from(json!({"name": "John", "age": 30})).into_csv(name_age);
        assert_eq!(export_to_string(&csv), "name,age\nJohn,30\n");
    }

    #[test]
    fn test_multiple_rows() {
        let csv = DynamicValue::from(json!([
            {"name": "John", "age": 30},
            {"name": "Jane", "age": 25}
        ]))
        .into_csv(name_age);

        assert_eq!(export_to_string(&csv), "name,age\nJohn,30\nJane,25\n");
    }

    #[test]
    fn test_missing_values_render_empty() {
        let csv = DynamicValue::from(json!([
            {"name": "John", "age": 30},
            {"name": "Jane"}
        ]))
        .into_csv(name_age);

        assert_eq!(export_to_string(&csv), "name,age\nJohn,30\nJane,\n");
    }

    #[test]
    fn test_extra_columns_in_later_rows_are_dropped() {
        // The first row defines the schema; a column first declared on a
        // later row never reaches the output.
        let csv = DynamicValue::from(json!([
            {"name": "John"},
            {"name": "Jane", "city": "LA"}
        ]))
        .into_csv(|s, d| {
            d.col("name", s.key(&["name"]));
            if !s.key(&["city"]).value().is_null() {
                d.col("city", s.key(&["city"]));
            }
        });

        assert_eq!(export_to_string(&csv), "name\nJohn\nJane\n");
    }

    #[test]
    fn test_empty_array_yields_no_output() {
        let mut buf = Vec::new();
        DynamicValue::from(json!([]))
            .into_csv(name_age)
            .export(&mut buf)
            .unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_error_root_writes_nothing() {
        let csv = DynamicValue::read_json("{invalid}".as_bytes()).into_csv(name_age);

        let mut buf = Vec::new();
        let err = csv.export(&mut buf).unwrap_err();
        assert!(matches!(err, ExportError::Decode(_)));
        assert!(buf.is_empty());

        // The stored error comes back on every later call too.
        let mut buf2 = Vec::new();
        assert_eq!(csv.export(&mut buf2).unwrap_err(), err);
        assert!(buf2.is_empty());
    }

    #[test]
    fn test_unsupported_root() {
        let csv = DynamicValue::from(json!("just a string")).into_csv(name_age);

        let mut buf = Vec::new();
        let err = csv.export(&mut buf).unwrap_err();
        assert_eq!(err, ExportError::UnsupportedRoot(DataKind::String));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_export_split_partitions_rows() {
        let csv = DynamicValue::from(json!([
            {"name": "John", "age": 30},
            {"name": "Jane", "age": 25}
        ]))
        .into_csv(name_age);

        let mut over = Vec::new();
        let mut under = Vec::new();
        csv.export_split(vec![
            Destination::split(&mut over, "age", |age: i64| age >= 30),
            Destination::split(&mut under, "age", |age: i64| age < 30),
        ])
        .unwrap();

        assert_eq!(String::from_utf8(over).unwrap(), "name,age\nJohn,30\n");
        assert_eq!(String::from_utf8(under).unwrap(), "name,age\nJane,25\n");
    }

    #[test]
    fn test_export_split_no_matches_still_writes_header() {
        let csv = DynamicValue::from(json!([{"name": "John", "age": 30}])).into_csv(name_age);

        let mut buf = Vec::new();
        csv.export_split(vec![Destination::split(&mut buf, "age", |age: i64| {
            age > 100
        })])
        .unwrap();

        assert_eq!(String::from_utf8(buf).unwrap(), "name,age\n");
    }

    #[test]
    fn test_export_split_multiple_conditions() {
        let data = json!([
            {"name": "John", "age": 30, "city": "NYC"},
            {"name": "Jane", "age": 25, "city": "LA"},
            {"name": "Bob", "age": 35, "city": "NYC"}
        ]);
        let csv = DynamicValue::from(data).into_csv(|s, d| {
            d.col("name", s.key(&["name"]));
            d.col("age", s.key(&["age"]));
            d.col("city", s.key(&["city"]));
        });

        let mut nyc = Vec::new();
        let mut adults = Vec::new();
        let mut all = Vec::new();
        csv.export_split(vec![
            Destination::split(&mut nyc, "city", |city: String| city == "NYC"),
            Destination::split(&mut adults, "age", |age: i64| age >= 30),
            Destination::no_split(&mut all),
        ])
        .unwrap();

        assert_eq!(
            String::from_utf8(nyc).unwrap(),
            "name,age,city\nJohn,30,NYC\nBob,35,NYC\n"
        );
        assert_eq!(
            String::from_utf8(adults).unwrap(),
            "name,age,city\nJohn,30,NYC\nBob,35,NYC\n"
        );
        assert_eq!(
            String::from_utf8(all).unwrap(),
            "name,age,city\nJohn,30,NYC\nJane,25,LA\nBob,35,NYC\n"
        );
    }

    #[test]
    fn test_export_split_and_composition() {
        let csv = DynamicValue::from(json!([
            {"name": "John", "age": 30, "city": "NYC"},
            {"name": "Bob", "age": 35, "city": "LA"}
        ]))
        .into_csv(|s, d| {
            d.col("name", s.key(&["name"]));
            d.col("age", s.key(&["age"]));
            d.col("city", s.key(&["city"]));
        });

        let mut buf = Vec::new();
        csv.export_split(vec![Destination::split_and(
            &mut buf,
            vec![
                Box::new(ColumnSplit::new("age", |age: i64| age >= 30)),
                Box::new(ColumnSplit::new("city", |city: String| city == "NYC")),
            ],
        )])
        .unwrap();

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "name,age,city\nJohn,30,NYC\n"
        );
    }

    #[test]
    fn test_export_split_or_composition() {
        let csv = DynamicValue::from(json!([
            {"name": "John", "age": 30, "city": "NYC"},
            {"name": "Jane", "age": 25, "city": "LA"},
            {"name": "Bob", "age": 35, "city": "LA"}
        ]))
        .into_csv(|s, d| {
            d.col("name", s.key(&["name"]));
            d.col("age", s.key(&["age"]));
            d.col("city", s.key(&["city"]));
        });

        let mut buf = Vec::new();
        csv.export_split(vec![Destination::split_or(
            &mut buf,
            vec![
                Box::new(ColumnSplit::new("age", |age: i64| age >= 35)),
                Box::new(ColumnSplit::new("age", |age: i64| age < 30)),
            ],
        )])
        .unwrap();

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "name,age,city\nJane,25,LA\nBob,35,LA\n"
        );
    }

    #[test]
    fn test_export_split_or_across_columns_includes_all() {
        // Predicates are column-scoped: a splitter bound to a different
        // column answers include, so an OR over two distinct columns
        // short-circuits to true for every column of every row.
        let csv = DynamicValue::from(json!([
            {"name": "John", "age": 30, "city": "NYC"},
            {"name": "Jane", "age": 25, "city": "LA"},
            {"name": "Bob", "age": 35, "city": "LA"}
        ]))
        .into_csv(|s, d| {
            d.col("name", s.key(&["name"]));
            d.col("age", s.key(&["age"]));
            d.col("city", s.key(&["city"]));
        });

        let mut buf = Vec::new();
        csv.export_split(vec![Destination::split_or(
            &mut buf,
            vec![
                Box::new(ColumnSplit::new("age", |age: i64| age >= 35)),
                Box::new(ColumnSplit::new("city", |city: String| city == "NYC")),
            ],
        )])
        .unwrap();

        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "name,age,city\nJohn,30,NYC\nJane,25,LA\nBob,35,LA\n"
        );
    }

    #[test]
    fn test_split_predicate_error_aborts_export() {
        let csv = DynamicValue::from(json!([{"name": "John", "age": 30}])).into_csv(name_age);

        let mut buf = Vec::new();
        let err = csv
            .export_split(vec![Destination::split(&mut buf, "name", |v: i64| v > 0)])
            .unwrap_err();

        assert!(matches!(err, ExportError::SplitTypeMismatch { .. }));
    }

    #[test]
    fn test_widened_split_on_float_column() {
        // JSON floats with whole values still match int-typed predicates.
        let csv = DynamicValue::from(json!([
            {"name": "John", "age": 30.0},
            {"name": "Jane", "age": 25.0}
        ]))
        .into_csv(name_age);

        let mut over = Vec::new();
        let mut under = Vec::new();
        csv.export_split(vec![
            Destination::split(&mut over, "age", |age: i64| age >= 30),
            Destination::split(&mut under, "age", |age: i64| age < 30),
        ])
        .unwrap();

        assert_eq!(String::from_utf8(over).unwrap(), "name,age\nJohn,30\n");
        assert_eq!(String::from_utf8(under).unwrap(), "name,age\nJane,25\n");
    }

    #[test]
    fn test_stream_export() {
        let ndjson = "{\"name\":\"John\",\"age\":30}\n{\"name\":\"Jane\",\"age\":25}\n";
        let csv = DynamicValue::stream_json(ndjson.as_bytes()).into_csv(name_age);

        assert_eq!(export_to_string(&csv), "name,age\nJohn,30\nJane,25\n");
    }

    #[test]
    fn test_stream_export_replay_yields_no_rows() {
        let ndjson = "{\"name\":\"John\",\"age\":30}\n";
        let csv = DynamicValue::stream_json(ndjson.as_bytes()).into_csv(name_age);

        assert_eq!(export_to_string(&csv), "name,age\nJohn,30\n");

        // The reader was consumed by the first export; replaying succeeds
        // but produces no rows.
        let mut buf = Vec::new();
        csv.export(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_stream_yields_no_output() {
        let mut buf = Vec::new();
        DynamicValue::stream_json("".as_bytes())
            .into_csv(name_age)
            .export(&mut buf)
            .unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stream_decode_error_keeps_written_prefix() {
        let ndjson = "{\"name\":\"John\",\"age\":30}\nnot json\n";
        let csv = DynamicValue::stream_json(ndjson.as_bytes()).into_csv(name_age);

        let mut buf = Vec::new();
        let err = csv.export(&mut buf).unwrap_err();
        assert!(matches!(err, ExportError::Decode(_)));

        // The row decoded before the failure stays written.
        assert_eq!(String::from_utf8(buf).unwrap(), "name,age\nJohn,30\n");
    }

    #[test]
    fn test_formatted_column() {
        let csv = DynamicValue::from(json!([{"name": "john"}])).into_csv(|s, d| {
            d.col_formatted(
                "name",
                s.key(&["name"]),
                safe_formatter(|v: String| v.to_uppercase()),
            );
        });

        assert_eq!(export_to_string(&csv), "name\nJOHN\n");
    }

    #[test]
    fn test_formatter_mismatch_aborts_export() {
        let csv = DynamicValue::from(json!([{"age": 30}])).into_csv(|s, d| {
            d.col_formatted(
                "age",
                s.key(&["age"]),
                safe_formatter(|v: String| v.to_uppercase()),
            );
        });

        let mut buf = Vec::new();
        let err = csv.export(&mut buf).unwrap_err();
        assert!(matches!(err, ExportError::Column { .. }));
    }

    #[test]
    fn test_fields_needing_quotes() {
        let csv = DynamicValue::from(json!([{"name": "Doe, John", "note": "say \"hi\""}]))
            .into_csv(|s, d| {
                d.col("name", s.key(&["name"]));
                d.col("note", s.key(&["note"]));
            });

        assert_eq!(
            export_to_string(&csv),
            "name,note\n\"Doe, John\",\"say \"\"hi\"\"\"\n"
        );
    }

    #[test]
    fn test_nested_value_renders_as_json() {
        let csv = DynamicValue::from(json!([{"name": "John", "meta": {"x": 1}}]))
            .into_csv(|s, d| {
                d.col("name", s.key(&["name"]));
                d.col("meta", s.key(&["meta"]));
            });

        assert_eq!(
            export_to_string(&csv),
            "name,meta\nJohn,\"{\"\"x\"\":1}\"\n"
        );
    }

    #[test]
    fn test_large_array_respects_channel_bound() {
        // More rows than the channel bound; order must be preserved.
        let rows: Vec<serde_json::Value> = (0..500).map(|i| json!({"n": i})).collect();
        let csv = DynamicValue::from(serde_json::Value::Array(rows)).into_csv(|s, d| {
            d.col("n", s.key(&["n"]));
        });

        let out = export_to_string(&csv);
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("n"));
        for (i, line) in lines.enumerate() {
            assert_eq!(line, i.to_string());
        }
    }
}

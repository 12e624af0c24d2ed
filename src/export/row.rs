//! Row building: the [`Source`] read cursor and the [`Dest`] accumulator
//! that a flattener writes named columns into.

use std::collections::HashMap;

use crate::export::error::ExportError;
use crate::export::format::Formatter;
use crate::export::value::DynamicValue;

/// Read cursor over one record's [`DynamicValue`], optionally carrying a
/// formatter to apply at render time.
///
/// `key` and `idx` return new cursors; they never mutate the receiver.
pub struct Source {
    value: DynamicValue,
    formatter: Option<Formatter>,
}

impl Source {
    pub(crate) fn new(value: DynamicValue) -> Self {
        Source {
            value,
            formatter: None,
        }
    }

    /// Walks nested object keys; failed navigation yields a null cursor.
    pub fn key(&self, keys: &[&str]) -> Source {
        Source::new(self.value.key(keys))
    }

    /// Array element access; out of range or wrong kind yields a null cursor.
    pub fn idx(&self, index: usize) -> Source {
        Source::new(self.value.idx(index))
    }

    pub(crate) fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// The raw value this cursor points at, before any formatter runs.
    /// Split predicates are evaluated against this.
    pub(crate) fn value(&self) -> &DynamicValue {
        &self.value
    }

    /// String form of the value, with the attached formatter applied first.
    /// A formatter failure goes through the error-tagged-value path, so it
    /// surfaces as a poisoned render.
    pub(crate) fn render(&self) -> Result<String, ExportError> {
        match &self.formatter {
            Some(formatter) => self.value.format(formatter).render(),
            None => self.value.render(),
        }
    }
}

/// Column accumulator handed to the flattener once per record.
pub trait Dest {
    /// Adds a column. First appearance fixes its position in the header
    /// row; the same name twice overwrites the value for this row only.
    fn col(&mut self, name: &str, value: Source);

    /// Adds a column whose value runs through `formatter` before rendering.
    fn col_formatted(&mut self, name: &str, value: Source, formatter: Formatter);
}

/// One output record: named columns plus, on the first row of a batch,
/// the header list in first-insertion order.
pub(crate) struct Row {
    columns: HashMap<String, Source>,
    headers: Vec<String>,
    with_headers: bool,
}

impl Row {
    pub(crate) fn new(with_headers: bool) -> Self {
        Row {
            columns: HashMap::new(),
            headers: Vec::new(),
            with_headers,
        }
    }

    pub(crate) fn has_headers(&self) -> bool {
        self.with_headers
    }

    pub(crate) fn headers(&self) -> &[String] {
        &self.headers
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Source> {
        self.columns.get(name)
    }
}

impl Dest for Row {
    fn col(&mut self, name: &str, value: Source) {
        if self.with_headers && !self.headers.iter().any(|h| h == name) {
            self.headers.push(name.to_string());
        }
        self.columns.insert(name.to_string(), value);
    }

    fn col_formatted(&mut self, name: &str, value: Source, formatter: Formatter) {
        self.col(name, value.with_formatter(formatter));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::format::safe_formatter;
    use serde_json::json;

    #[test]
    fn test_col_tracks_headers_in_order() {
        let mut row = Row::new(true);
        row.col("name", Source::new(DynamicValue::from(json!("John"))));
        row.col("age", Source::new(DynamicValue::from(json!(30))));
        row.col("name", Source::new(DynamicValue::from(json!("Jane"))));

        assert_eq!(row.headers(), &["name", "age"]);
        assert_eq!(row.get("name").unwrap().render().unwrap(), "Jane");
        assert_eq!(row.get("age").unwrap().render().unwrap(), "30");
    }

    #[test]
    fn test_row_without_headers() {
        let mut row = Row::new(false);
        row.col("name", Source::new(DynamicValue::from(json!("John"))));

        assert!(!row.has_headers());
        assert!(row.headers().is_empty());
        assert_eq!(row.get("name").unwrap().render().unwrap(), "John");
    }

    #[test]
    fn test_col_formatted_applies_at_render() {
        let mut row = Row::new(true);
        row.col_formatted(
            "name",
            Source::new(DynamicValue::from(json!("john"))),
            safe_formatter(|s: String| s.to_uppercase()),
        );

        assert_eq!(row.get("name").unwrap().render().unwrap(), "JOHN");
    }

    #[test]
    fn test_col_formatted_mismatch_poisons_render() {
        let mut row = Row::new(true);
        row.col_formatted(
            "age",
            Source::new(DynamicValue::from(json!(30))),
            safe_formatter(|s: String| s.to_uppercase()),
        );

        let err = row.get("age").unwrap().render().unwrap_err();
        assert!(matches!(err, ExportError::Poisoned(_)));
    }

    #[test]
    fn test_source_navigation() {
        let source = Source::new(DynamicValue::from(json!({
            "user": {"name": "John"},
            "tags": ["a", "b"]
        })));

        assert_eq!(source.key(&["user", "name"]).render().unwrap(), "John");
        assert_eq!(source.key(&["tags"]).idx(1).render().unwrap(), "b");
        assert_eq!(source.key(&["missing"]).render().unwrap(), "");
    }
}

//! Typed value formatters.
//!
//! A [`Formatter`] transforms a column's [`DynamicValue`] before rendering.
//! Construction captures the expected kind; the runtime tag is checked
//! before the native function is invoked, so a mismatch becomes an error
//! instead of a panic.

use std::sync::Arc;

use crate::export::error::ExportError;
use crate::export::value::{DataKind, DynamicValue, NativeValue};

/// Transform applied to a column value before it is rendered.
///
/// Shared and immutable; rows carrying a formatter cross the producer
/// thread boundary, hence the `Send + Sync` bounds.
pub type Formatter =
    Arc<dyn Fn(&DynamicValue) -> Result<DynamicValue, ExportError> + Send + Sync>;

/// Builds a [`Formatter`] from a fallible native transform.
///
/// Null values (including error-tagged ones) pass through untouched. A
/// value whose kind does not match `T` yields
/// [`ExportError::FormatterTypeMismatch`]; a user error is wrapped in
/// [`ExportError::Format`].
pub fn formatter<T, S, F>(f: F) -> Formatter
where
    T: NativeValue,
    S: NativeValue,
    F: Fn(T) -> anyhow::Result<S> + Send + Sync + 'static,
{
    Arc::new(move |value: &DynamicValue| {
        if let Some(err) = value.error() {
            return Ok(DynamicValue::from_error(err.clone()));
        }
        if value.kind() == DataKind::Null {
            return Ok(DynamicValue::null());
        }

        let native = T::from_value(value).ok_or(ExportError::FormatterTypeMismatch {
            expected: T::KIND,
            actual: value.kind(),
        })?;

        let formatted = f(native).map_err(|err| ExportError::Format(err.to_string()))?;
        Ok(formatted.into_value())
    })
}

/// Builds a [`Formatter`] from an infallible native transform.
pub fn safe_formatter<T, S, F>(f: F) -> Formatter
where
    T: NativeValue,
    S: NativeValue,
    F: Fn(T) -> S + Send + Sync + 'static,
{
    formatter(move |value: T| Ok(f(value)))
}

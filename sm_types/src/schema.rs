//! Declared column types of registry snapshots and the casts that enforce them.
//!
//! Every value read from a snapshot goes through these casts so that the same
//! logical value always has the same representation: `"3"`, `"3.0"` and `3`
//! draw-month values all become `Some(3)`.

use crate::constants::{DRAWDD, DRAWDM, DRAWDY, LSTUDY, NOT_APPLICABLE, VIDVAL};
use ordered_float::OrderedFloat;
use std::path::PathBuf;

/// Storage type of a snapshot column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Kept as a string, including patient ids that look numeric.
    Text,
    /// Integer that may be missing. Integral floats such as `"4.0"` are accepted.
    NullableInt,
    /// Float that may be missing.
    NullableFloat,
}

impl ColumnType {
    fn expected(self) -> &'static str {
        match self {
            ColumnType::Text => "a text value",
            ColumnType::NullableInt => "an integer",
            ColumnType::NullableFloat => "a number",
        }
    }
}

/// Declared type of `column`. Columns outside the registry schema are text.
pub fn column_type(column: &str) -> ColumnType {
    match column {
        DRAWDM | DRAWDD | DRAWDY => ColumnType::NullableInt,
        VIDVAL | LSTUDY => ColumnType::NullableFloat,
        _ => ColumnType::Text,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("On line {line} of {path:?} in '{column}' column: expected {expected} but received '{value}'")]
    BadValue {
        path: PathBuf,
        line: usize,
        column: String,
        expected: &'static str,
        value: String,
    },

    #[error("On line {line} of {path:?}: the specimen id ('guspec') is empty")]
    MissingSpecimenId { path: PathBuf, line: usize },

    #[error("The snapshot {path:?} has no 'guspec' column")]
    NoSpecimenIdColumn { path: PathBuf },
}

/// Location of a cell, used to build error messages.
#[derive(Debug, Clone, Copy)]
pub struct Cell<'a> {
    pub path: &'a std::path::Path,
    pub line: usize,
    pub column: &'a str,
}

impl Cell<'_> {
    fn bad_value(&self, ty: ColumnType, value: &str) -> SchemaError {
        SchemaError::BadValue {
            path: self.path.to_path_buf(),
            line: self.line,
            column: self.column.to_string(),
            expected: ty.expected(),
            value: value.to_string(),
        }
    }
}

/// Missing-value spellings found in registry extracts and pandas-written files.
fn is_missing_number(value: &str) -> bool {
    value.is_empty()
        || value == NOT_APPLICABLE
        || value == "<NA>"
        || value.eq_ignore_ascii_case("nan")
}

pub fn cast_text(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

pub fn cast_int(cell: Cell<'_>, value: Option<&str>) -> Result<Option<i64>, SchemaError> {
    let Some(value) = value.filter(|v| !is_missing_number(v)) else {
        return Ok(None);
    };
    if let Ok(v) = value.parse::<i64>() {
        return Ok(Some(v));
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(Some(v as i64)),
        _ => Err(cell.bad_value(ColumnType::NullableInt, value)),
    }
}

pub fn cast_float(
    cell: Cell<'_>,
    value: Option<&str>,
) -> Result<Option<OrderedFloat<f64>>, SchemaError> {
    let Some(value) = value.filter(|v| !is_missing_number(v)) else {
        return Ok(None);
    };
    value
        .parse::<f64>()
        .map(|v| Some(OrderedFloat(v)))
        .map_err(|_| cell.bad_value(ColumnType::NullableFloat, value))
}

/// Positional procedure rows
///
/// A stored procedure answers with rows of heterogeneous values whose meaning
/// is only given by position. `ProcRow` wraps one such row and offers the
/// coercions every decoder in `models` uses:
///
/// - numeric-looking values to `f64` (`None` when the value is falsy)
/// - 0/1-like values to `bool` with a per-field default for NULL
/// - timestamps to ISO-8601 strings (`None` when absent)
///
/// Accessors return `DecodeError` for out-of-range positions or values that
/// cannot be coerced, so decoders can skip a bad row and keep going.
///
/// # Example
///
/// ```
/// use stockwatch_shared::db::row::{ProcRow, Scalar};
///
/// let row = ProcRow::new(vec![
///     Scalar::from("success"),
///     Scalar::from("ok"),
///     Scalar::from("19.99"),
///     Scalar::Null,
/// ]);
///
/// assert_eq!(row.status(), Some("success"));
/// assert_eq!(row.price(2).unwrap(), Some(19.99));
/// assert_eq!(row.flag(3, true).unwrap(), true);
/// assert!(row.get(9).is_err());
/// ```

use chrono::{NaiveDateTime, Timelike};
use serde_json::Value;

/// Status value procedures use to report success in the first column
pub const STATUS_SUCCESS: &str = "success";

/// Status value procedures use to report a business-rule rejection
pub const STATUS_ERROR: &str = "error";

/// A single value returned by a procedure (or bound as a parameter)
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// SQL NULL
    Null,

    /// Boolean (`TINYINT(1)`)
    Bool(bool),

    /// Any integer column
    Int(i64),

    /// DECIMAL / FLOAT / DOUBLE
    Float(f64),

    /// Character data, dates and anything without a richer mapping
    Text(String),

    /// DATETIME / TIMESTAMP
    DateTime(NaiveDateTime),
}

impl Scalar {
    /// Whether the value is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Truthiness as the procedures' callers have always interpreted it:
    /// NULL, zero, false and the empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Int(i) => *i != 0,
            Scalar::Float(f) => *f != 0.0,
            Scalar::Text(s) => !s.is_empty(),
            Scalar::DateTime(_) => true,
        }
    }

    /// Borrows the value as a string slice when it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the value to JSON, rendering timestamps as ISO-8601
    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => Value::from(*f),
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::DateTime(dt) => Value::String(isoformat(dt)),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(value: NaiveDateTime) -> Self {
        Scalar::DateTime(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Scalar::Null, Into::into)
    }
}

/// Error raised when a positional value cannot be read
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Position past the end of the row
    #[error("column {index} out of range for row of length {len}")]
    OutOfRange { index: usize, len: usize },

    /// Value present but not coercible to the requested type
    #[error("column {index}: cannot read {found} as {expected}")]
    Type {
        index: usize,
        expected: &'static str,
        found: String,
    },
}

/// One positional result row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcRow(Vec<Scalar>);

impl ProcRow {
    /// Wraps the values of a row
    pub fn new(values: Vec<Scalar>) -> Self {
        Self(values)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All values in column order
    pub fn values(&self) -> &[Scalar] {
        &self.0
    }

    /// Value at `index`, failing when the row is too short
    pub fn get(&self, index: usize) -> Result<&Scalar, DecodeError> {
        self.0.get(index).ok_or(DecodeError::OutOfRange {
            index,
            len: self.0.len(),
        })
    }

    /// First column as text (the procedure status in most result shapes)
    pub fn status(&self) -> Option<&str> {
        self.0.first().and_then(Scalar::as_str)
    }

    /// Whether the first column reports success
    pub fn is_success(&self) -> bool {
        self.status() == Some(STATUS_SUCCESS)
    }

    /// Whether the row is a bare `(status, message)` pair
    pub fn is_status_only(&self) -> bool {
        self.0.len() == 2 && self.status().is_some()
    }

    /// Text at `index`; NULL is `None`, other scalars are rendered
    pub fn text(&self, index: usize) -> Result<Option<String>, DecodeError> {
        Ok(match self.get(index)? {
            Scalar::Null => None,
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Int(i) => Some(i.to_string()),
            Scalar::Float(f) => Some(f.to_string()),
            Scalar::Bool(b) => Some(b.to_string()),
            Scalar::DateTime(dt) => Some(isoformat(dt)),
        })
    }

    /// Text at `index`, or `default` when the value is falsy
    pub fn text_or(&self, index: usize, default: &str) -> Result<String, DecodeError> {
        let value = self.get(index)?;
        if !value.is_truthy() {
            return Ok(default.to_string());
        }
        Ok(self.text(index)?.unwrap_or_else(|| default.to_string()))
    }

    /// Integer at `index`; NULL is `None`
    pub fn int(&self, index: usize) -> Result<Option<i64>, DecodeError> {
        match self.get(index)? {
            Scalar::Null => Ok(None),
            Scalar::Int(i) => Ok(Some(*i)),
            Scalar::Bool(b) => Ok(Some(i64::from(*b))),
            Scalar::Float(f) if f.fract() == 0.0 => Ok(Some(*f as i64)),
            Scalar::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| type_error(index, "integer", self.get(index))),
            other => Err(type_error(index, "integer", Ok(other))),
        }
    }

    /// Integer at `index`, or `default` when the value is falsy
    pub fn int_or(&self, index: usize, default: i64) -> Result<i64, DecodeError> {
        if !self.get(index)?.is_truthy() {
            return Ok(default);
        }
        Ok(self.int(index)?.unwrap_or(default))
    }

    /// Float at `index`; NULL is `None`
    pub fn float(&self, index: usize) -> Result<Option<f64>, DecodeError> {
        match self.get(index)? {
            Scalar::Null => Ok(None),
            Scalar::Float(f) => Ok(Some(*f)),
            Scalar::Int(i) => Ok(Some(*i as f64)),
            Scalar::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
            Scalar::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| type_error(index, "number", self.get(index))),
            other => Err(type_error(index, "number", Ok(other))),
        }
    }

    /// Price-like value: `None` when falsy, otherwise coerced to `f64`
    pub fn price(&self, index: usize) -> Result<Option<f64>, DecodeError> {
        if !self.get(index)?.is_truthy() {
            return Ok(None);
        }
        self.float(index)
    }

    /// Float at `index`, or `default` when NULL
    pub fn float_or(&self, index: usize, default: f64) -> Result<f64, DecodeError> {
        Ok(self.float(index)?.unwrap_or(default))
    }

    /// Boolean flag at `index`, or `default` when NULL
    pub fn flag(&self, index: usize, default: bool) -> Result<bool, DecodeError> {
        let value = self.get(index)?;
        if value.is_null() {
            return Ok(default);
        }
        Ok(value.is_truthy())
    }

    /// ISO-8601 timestamp at `index`, `None` when absent
    ///
    /// Text values are passed through untouched; some procedures format
    /// their own dates.
    pub fn timestamp(&self, index: usize) -> Result<Option<String>, DecodeError> {
        match self.get(index)? {
            Scalar::DateTime(dt) => Ok(Some(isoformat(dt))),
            Scalar::Text(s) if !s.is_empty() => Ok(Some(s.clone())),
            Scalar::Null | Scalar::Text(_) => Ok(None),
            other => Err(type_error(index, "timestamp", Ok(other))),
        }
    }

    /// Value at `index` as JSON, `Null` when falsy
    pub fn json_or_null(&self, index: usize) -> Result<Value, DecodeError> {
        let value = self.get(index)?;
        Ok(if value.is_truthy() {
            value.to_json()
        } else {
            Value::Null
        })
    }
}

/// Status and message carried in the first two columns of a mutation result
#[derive(Debug, Clone, PartialEq)]
pub struct ProcOutcome {
    /// `"success"`, `"error"` or whatever the procedure reports
    pub status: String,

    /// Human readable message from the procedure
    pub message: String,
}

impl ProcOutcome {
    /// Reads the outcome from the first row of a result set
    ///
    /// Returns `None` when the procedure produced no rows.
    pub fn from_rows(rows: &[ProcRow]) -> Option<Self> {
        let row = rows.first()?;
        Some(Self {
            status: row.text(0).ok().flatten().unwrap_or_default(),
            message: row.text(1).ok().flatten().unwrap_or_default(),
        })
    }

    /// Whether the procedure reported success
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Message of a leading `("error", message)` row, if the result starts with one
pub fn leading_error(rows: &[ProcRow]) -> Option<String> {
    let first = rows.first()?;
    if first.status() != Some(STATUS_ERROR) {
        return None;
    }
    Some(first.text(1).ok().flatten().unwrap_or_default())
}

/// Formats a timestamp like `datetime.isoformat()`: seconds precision, with
/// a six digit fraction only when there is a sub-second part.
pub fn isoformat(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn type_error(
    index: usize,
    expected: &'static str,
    found: Result<&Scalar, DecodeError>,
) -> DecodeError {
    DecodeError::Type {
        index,
        expected,
        found: found.map(|v| format!("{:?}", v)).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, micros: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_micro_opt(h, m, s, micros)
            .unwrap()
    }

    #[test]
    fn test_isoformat_without_fraction() {
        assert_eq!(isoformat(&at(9, 4, 0, 0)), "2024-03-05T09:04:00");
    }

    #[test]
    fn test_isoformat_with_fraction() {
        assert_eq!(isoformat(&at(9, 4, 0, 1500)), "2024-03-05T09:04:00.001500");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Scalar::Null.is_truthy());
        assert!(!Scalar::Int(0).is_truthy());
        assert!(!Scalar::Float(0.0).is_truthy());
        assert!(!Scalar::from("").is_truthy());
        assert!(Scalar::from("0").is_truthy());
        assert!(Scalar::DateTime(at(0, 0, 0, 0)).is_truthy());
    }

    #[test]
    fn test_price_coercion() {
        let row = ProcRow::new(vec![
            Scalar::from("12.50"),
            Scalar::Int(0),
            Scalar::Null,
            Scalar::Float(3.25),
            Scalar::from("n/a"),
        ]);

        assert_eq!(row.price(0).unwrap(), Some(12.5));
        assert_eq!(row.price(1).unwrap(), None);
        assert_eq!(row.price(2).unwrap(), None);
        assert_eq!(row.price(3).unwrap(), Some(3.25));
        assert!(matches!(row.price(4), Err(DecodeError::Type { index: 4, .. })));
    }

    #[test]
    fn test_flag_defaults_only_for_null() {
        let row = ProcRow::new(vec![Scalar::Null, Scalar::Int(0), Scalar::Bool(true)]);
        assert!(row.flag(0, true).unwrap());
        assert!(!row.flag(1, true).unwrap());
        assert!(row.flag(2, false).unwrap());
    }

    #[test]
    fn test_out_of_range() {
        let row = ProcRow::new(vec![Scalar::from("success")]);
        assert_eq!(
            row.get(3).unwrap_err(),
            DecodeError::OutOfRange { index: 3, len: 1 }
        );
    }

    #[test]
    fn test_text_or_and_int_or() {
        let row = ProcRow::new(vec![Scalar::from(""), Scalar::Int(7), Scalar::Null]);
        assert_eq!(row.text_or(0, "light").unwrap(), "light");
        assert_eq!(row.int_or(1, 10).unwrap(), 7);
        assert_eq!(row.int_or(2, 10).unwrap(), 10);
    }

    #[test]
    fn test_outcome_and_leading_error() {
        let rows = vec![ProcRow::new(vec![
            Scalar::from("error"),
            Scalar::from("Product not found"),
        ])];

        let outcome = ProcOutcome::from_rows(&rows).unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.message, "Product not found");
        assert_eq!(leading_error(&rows).as_deref(), Some("Product not found"));
        assert!(ProcOutcome::from_rows(&[]).is_none());
    }

    #[test]
    fn test_status_only_row() {
        let row = ProcRow::new(vec![Scalar::from("success"), Scalar::from("done")]);
        assert!(row.is_status_only());
        assert!(row.is_success());
    }
}

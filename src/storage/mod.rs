pub mod duckdb_store;
pub mod migrations;
pub mod schema;

use crate::model::{Event, Hit, Session};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub use duckdb_store::DuckDbStore;

/// Errors raised by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),
    #[error("column {column} does not decode as {expected}")]
    Decode {
        column: usize,
        expected: &'static str,
    },
}

/// A bound query argument or a decoded result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    List(Vec<Value>),
}

impl Value {
    /// Placeholder text for this value. Temporal values are bound as text and cast.
    pub const fn placeholder(&self) -> &'static str {
        match self {
            Self::Timestamp(_) => "CAST(? AS TIMESTAMP)",
            Self::Date(_) => "CAST(? AS DATE)",
            _ => "?",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v.naive_utc())
    }
}

/// One result row. NULL cells decode as the zero value of the requested type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub const fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn cell(&self, column: usize, expected: &'static str) -> Result<&Value, StoreError> {
        self.values
            .get(column)
            .ok_or(StoreError::Decode { column, expected })
    }

    pub fn get_i64(&self, column: usize) -> Result<i64, StoreError> {
        match self.cell(column, "integer")? {
            Value::Null => Ok(0),
            Value::Int(v) => Ok(*v),
            Value::Bool(v) => Ok(i64::from(*v)),
            _ => Err(StoreError::Decode {
                column,
                expected: "integer",
            }),
        }
    }

    /// Non-negative integer; negative values clamp to 0.
    pub fn get_u64(&self, column: usize) -> Result<u64, StoreError> {
        self.get_i64(column)
            .map(|v| u64::try_from(v).unwrap_or_default())
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn get_f64(&self, column: usize) -> Result<f64, StoreError> {
        match self.cell(column, "float")? {
            Value::Null => Ok(0.0),
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            _ => Err(StoreError::Decode {
                column,
                expected: "float",
            }),
        }
    }

    pub fn get_string(&self, column: usize) -> Result<String, StoreError> {
        match self.cell(column, "text")? {
            Value::Null => Ok(String::new()),
            Value::Text(v) => Ok(v.clone()),
            _ => Err(StoreError::Decode {
                column,
                expected: "text",
            }),
        }
    }

    pub fn get_bool(&self, column: usize) -> Result<bool, StoreError> {
        match self.cell(column, "boolean")? {
            Value::Null => Ok(false),
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            _ => Err(StoreError::Decode {
                column,
                expected: "boolean",
            }),
        }
    }

    pub fn get_date(&self, column: usize) -> Result<NaiveDate, StoreError> {
        let err = StoreError::Decode {
            column,
            expected: "date",
        };
        match self.cell(column, "date")? {
            Value::Date(v) => Ok(*v),
            Value::Timestamp(v) => Ok(v.date()),
            Value::Text(v) => NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| err),
            _ => Err(err),
        }
    }

    pub fn get_timestamp(&self, column: usize) -> Result<NaiveDateTime, StoreError> {
        match self.cell(column, "timestamp")? {
            Value::Timestamp(v) => Ok(*v),
            Value::Date(v) => Ok(v.and_time(chrono::NaiveTime::MIN)),
            _ => Err(StoreError::Decode {
                column,
                expected: "timestamp",
            }),
        }
    }
}

/// Persistence and query execution for hits and events.
///
/// Implementations own all I/O. Callers never retry; errors are returned as-is.
pub trait Store: Send + Sync {
    fn save_hits(&self, hits: &[Hit]) -> Result<(), StoreError>;

    fn save_events(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Most recent session cursor of a visitor with a hit at or after `max_age`.
    fn session(
        &self,
        client_id: i64,
        fingerprint: &str,
        max_age: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Runs a query whose first column of the first row is a count.
    fn count(&self, query: &str, args: &[Value]) -> Result<u64, StoreError>;

    fn get(&self, query: &str, args: &[Value]) -> Result<Option<Row>, StoreError>;

    fn select(&self, query: &str, args: &[Value]) -> Result<Vec<Row>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_decodes_as_zero_value() {
        let row = Row::new(vec![Value::Null, Value::Null, Value::Null]);
        assert_eq!(row.get_u64(0).unwrap(), 0);
        assert!(row.get_f64(1).unwrap().abs() < f64::EPSILON);
        assert_eq!(row.get_string(2).unwrap(), "");
    }

    #[test]
    fn test_negative_count_clamps() {
        let row = Row::new(vec![Value::Int(-3)]);
        assert_eq!(row.get_u64(0).unwrap(), 0);
    }

    #[test]
    fn test_missing_column_is_decode_error() {
        let row = Row::new(vec![Value::Int(1)]);
        assert!(matches!(
            row.get_i64(4),
            Err(StoreError::Decode { column: 4, .. })
        ));
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let row = Row::new(vec![Value::Text("x".to_string())]);
        assert!(row.get_i64(0).is_err());
        assert!(row.get_date(0).is_err());
    }

    #[test]
    fn test_date_from_text_and_timestamp() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let row = Row::new(vec![
            Value::Text("2024-03-09".to_string()),
            Value::Timestamp(date.and_hms_opt(13, 0, 0).unwrap()),
        ]);
        assert_eq!(row.get_date(0).unwrap(), date);
        assert_eq!(row.get_date(1).unwrap(), date);
    }

    #[test]
    fn test_placeholder_casts_temporal_values() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(Value::from(date).placeholder(), "CAST(? AS DATE)");
        assert_eq!(
            Value::from(date.and_hms_opt(0, 0, 0).unwrap()).placeholder(),
            "CAST(? AS TIMESTAMP)"
        );
        assert_eq!(Value::from(5_i64).placeholder(), "?");
    }
}

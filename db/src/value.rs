use std::collections::VecDeque;
use std::sync::Arc;

use crate::{Error, Result};

/// A dynamically typed SQL value.
///
/// JSON values travel as raw bytes; the connection layer maps them to
/// `jsonb` on PostgreSQL and to text inside a `blob` column on SQLite.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int64(i64),
    Text(String),
    Bytes(Vec<u8>),
    Json(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        match v {
            Some(v) => Value::Int64(v),
            None => Value::Null,
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

/// One fetched row: shared column names plus owned values.
#[derive(Clone, Debug)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::NoColumn(name.to_owned()))?;
        Ok(&self.values[index])
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            Value::Int64(v) => Ok(*v),
            _ => Err(Error::TypeMismatch(name.to_owned())),
        }
    }

    pub fn get_opt_i64(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Int64(v) => Ok(Some(*v)),
            _ => Err(Error::TypeMismatch(name.to_owned())),
        }
    }

    /// Returns a string column; NULL reads as `None`.
    pub fn get_opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Text(v) => Ok(Some(v)),
            _ => Err(Error::TypeMismatch(name.to_owned())),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        Ok(self.get_opt_str(name)?.unwrap_or_default().to_owned())
    }

    /// Returns raw JSON bytes; NULL reads as empty.
    pub fn get_json(&self, name: &str) -> Result<Vec<u8>> {
        match self.get(name)? {
            Value::Null => Ok(Vec::new()),
            Value::Json(v) | Value::Bytes(v) => Ok(v.clone()),
            Value::Text(v) => Ok(v.clone().into_bytes()),
            _ => Err(Error::TypeMismatch(name.to_owned())),
        }
    }
}

/// Single-pass cursor over a result set.
///
/// Rows are materialized when the query runs and drained lazily, which
/// keeps the explicit-close contract without tying the cursor to the
/// connection borrow.
#[derive(Debug)]
pub struct Rows {
    columns: Arc<Vec<String>>,
    rows: VecDeque<Vec<Value>>,
}

impl Rows {
    pub(crate) fn new(columns: Vec<String>, rows: VecDeque<Vec<Value>>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(Vec::new(), VecDeque::new())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Row> {
        let values = self.rows.pop_front()?;
        Some(Row::new(self.columns.clone(), values))
    }

    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let columns = Arc::new(vec![
            "id".to_owned(),
            "title".to_owned(),
            "owner_id".to_owned(),
            "config".to_owned(),
        ]);
        let row = Row::new(
            columns,
            vec![
                Value::Int64(12),
                Value::Text("example".to_owned()),
                Value::Null,
                Value::Json(b"{\"a\":1}".to_vec()),
            ],
        );
        assert_eq!(row.get_i64("id").unwrap(), 12);
        assert_eq!(row.get_str("title").unwrap(), "example");
        assert_eq!(row.get_opt_i64("owner_id").unwrap(), None);
        assert_eq!(row.get_json("config").unwrap(), b"{\"a\":1}".to_vec());
        assert!(matches!(row.get("unknown"), Err(Error::NoColumn(_))));
        assert!(matches!(
            row.get_i64("title"),
            Err(Error::TypeMismatch(_))
        ));
    }
}

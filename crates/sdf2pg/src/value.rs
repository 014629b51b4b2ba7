//! Scalar value types for rows read from a SQL Server Compact database.
//!
//! SQL Server Compact has a small, closed type system (no separate DATE or
//! TIME types, no timezone-aware timestamps), so a single owned enum covers
//! every column a cursor can produce.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// A single nullable scalar value read from the source database.
///
/// Values are owned: rows are built once per cursor step and discarded after
/// being written into the current batch, so there is nothing to borrow from.
#[derive(Debug, Clone, PartialEq)]
pub enum CeValue {
    /// SQL NULL.
    Null,

    /// `bit`.
    Bool(bool),

    /// `smallint` / `tinyint`.
    I16(i16),

    /// `int`.
    I32(i32),

    /// `bigint`.
    I64(i64),

    /// `real`.
    F32(f32),

    /// `float`.
    F64(f64),

    /// `numeric` / `money`.
    Decimal(Decimal),

    /// `nchar` / `nvarchar` / `ntext`.
    Text(String),

    /// `binary` / `varbinary` / `image` / `rowversion`.
    Bytes(Vec<u8>),

    /// `uniqueidentifier`.
    Uuid(Uuid),

    /// `datetime` (no offset information in the file).
    DateTime(NaiveDateTime),
}

impl CeValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, CeValue::Null)
    }

    /// Short tag used in warnings when a value cannot be converted.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            CeValue::Null => "null",
            CeValue::Bool(_) => "bit",
            CeValue::I16(_) => "smallint",
            CeValue::I32(_) => "int",
            CeValue::I64(_) => "bigint",
            CeValue::F32(_) => "real",
            CeValue::F64(_) => "float",
            CeValue::Decimal(_) => "numeric",
            CeValue::Text(_) => "nvarchar",
            CeValue::Bytes(_) => "varbinary",
            CeValue::Uuid(_) => "uniqueidentifier",
            CeValue::DateTime(_) => "datetime",
        }
    }
}

impl From<bool> for CeValue {
    fn from(v: bool) -> Self {
        CeValue::Bool(v)
    }
}

impl From<i16> for CeValue {
    fn from(v: i16) -> Self {
        CeValue::I16(v)
    }
}

impl From<i32> for CeValue {
    fn from(v: i32) -> Self {
        CeValue::I32(v)
    }
}

impl From<i64> for CeValue {
    fn from(v: i64) -> Self {
        CeValue::I64(v)
    }
}

impl From<f64> for CeValue {
    fn from(v: f64) -> Self {
        CeValue::F64(v)
    }
}

impl From<String> for CeValue {
    fn from(v: String) -> Self {
        CeValue::Text(v)
    }
}

impl From<&str> for CeValue {
    fn from(v: &str) -> Self {
        CeValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for CeValue {
    fn from(v: Vec<u8>) -> Self {
        CeValue::Bytes(v)
    }
}

impl From<Uuid> for CeValue {
    fn from(v: Uuid) -> Self {
        CeValue::Uuid(v)
    }
}

impl From<Decimal> for CeValue {
    fn from(v: Decimal) -> Self {
        CeValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for CeValue {
    fn from(v: NaiveDateTime) -> Self {
        CeValue::DateTime(v)
    }
}

impl<T> From<Option<T>> for CeValue
where
    T: Into<CeValue>,
{
    fn from(v: Option<T>) -> Self {
        v.map_or(CeValue::Null, Into::into)
    }
}

/// One validated attendance punch, ready to be written out.
///
/// Constructed only after conversion succeeds; `user_id` is strictly
/// positive by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    /// Person identifier from the device.
    pub user_id: i32,

    /// Punch instant, pinned to the UTC offset the source device's clock
    /// had at that local time.
    pub check_time: DateTime<FixedOffset>,

    /// Device verification method code; zero when unknown.
    pub verify_type: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_null() {
        assert!(CeValue::Null.is_null());
        assert!(!CeValue::I32(42).is_null());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(CeValue::from(None::<i32>), CeValue::Null);
        assert_eq!(CeValue::from(Some(7)), CeValue::I32(7));
    }

    #[test]
    fn test_from_implementations() {
        let v: CeValue = 42i32.into();
        assert_eq!(v, CeValue::I32(42));

        let v: CeValue = "hello".into();
        assert_eq!(v, CeValue::Text("hello".to_string()));
    }
}

//! In-memory engine backend with scripted failure behavior.
//!
//! Used by unit and integration tests to exercise the opener's retry
//! machine and the pipelines without a platform driver. The driver operates
//! against real file paths so backup/restore invariants can be checked on
//! actual bytes: a failed upgrade deliberately scribbles over the file to
//! prove the opener restores it.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use crate::schema::ColumnDescriptor;
use crate::value::CeValue;

use super::{
    DriverError, DriverErrorKind, DriverResult, RowCursor, SdfConnection, SdfDriver,
    NATIVE_OLDER_FORMAT, NATIVE_PASSWORD_MISMATCH,
};

/// What `upgrade` does once any password hurdle is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeBehavior {
    /// Rewrite the file and mark it current.
    Succeeds,
    /// Scribble over the file, then report an engine failure.
    Fails,
}

/// A table held in memory.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<CeValue>>,
}

impl MemoryTable {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append a column; ordinals are assigned in call order.
    #[must_use]
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        data_type: impl Into<String>,
        is_nullable: bool,
    ) -> Self {
        let ordinal = self.columns.len() as u32 + 1;
        self.columns.push(ColumnDescriptor {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable,
            ordinal,
        });
        self
    }

    /// Append a row; values must match the column count.
    #[must_use]
    pub fn with_row(mut self, row: Vec<CeValue>) -> Self {
        assert_eq!(row.len(), self.columns.len(), "row width mismatch");
        self.rows.push(row);
        self
    }

    /// Append a row without the width check, to simulate a source that
    /// hands back a malformed row.
    #[must_use]
    pub fn with_malformed_row(mut self, row: Vec<CeValue>) -> Self {
        self.rows.push(row);
        self
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Scriptable in-memory driver.
pub struct MemoryDriver {
    tables: Vec<MemoryTable>,
    password: Option<String>,
    old_format: Cell<bool>,
    upgrade_behavior: UpgradeBehavior,
    open_calls: Cell<u32>,
    upgrade_calls: Cell<u32>,
}

impl MemoryDriver {
    /// Create a driver over the given tables, current format, no password.
    pub fn new(tables: Vec<MemoryTable>) -> Self {
        Self {
            tables,
            password: None,
            old_format: Cell::new(false),
            upgrade_behavior: UpgradeBehavior::Succeeds,
            open_calls: Cell::new(0),
            upgrade_calls: Cell::new(0),
        }
    }

    /// Require this password on open and upgrade.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Start in the older file format, so opens demand an upgrade.
    #[must_use]
    pub fn with_old_format(self) -> Self {
        self.old_format.set(true);
        self
    }

    /// Script the upgrade outcome.
    #[must_use]
    pub fn with_upgrade_behavior(mut self, behavior: UpgradeBehavior) -> Self {
        self.upgrade_behavior = behavior;
        self
    }

    /// How many times `open` was called.
    pub fn open_calls(&self) -> u32 {
        self.open_calls.get()
    }

    /// How many times `upgrade` was called.
    pub fn upgrade_calls(&self) -> u32 {
        self.upgrade_calls.get()
    }

    fn check_password(&self, supplied: Option<&str>) -> DriverResult<()> {
        match &self.password {
            Some(expected) if supplied != Some(expected.as_str()) => {
                Err(DriverError::classify(
                    Some(NATIVE_PASSWORD_MISMATCH),
                    "The specified password does not match the database password.",
                ))
            }
            _ => Ok(()),
        }
    }
}

impl SdfDriver for MemoryDriver {
    fn open(&self, path: &Path, password: Option<&str>) -> DriverResult<Box<dyn SdfConnection>> {
        self.open_calls.set(self.open_calls.get() + 1);

        if !path.exists() {
            return Err(DriverError::new(
                DriverErrorKind::FileNotFound,
                format!("The database file cannot be found: {}", path.display()),
            ));
        }
        if self.old_format.get() {
            return Err(DriverError::classify(
                Some(NATIVE_OLDER_FORMAT),
                "The database file has been created by an earlier version of the engine.",
            ));
        }
        self.check_password(password)?;

        Ok(Box::new(MemoryConnection {
            tables: self.tables.clone(),
        }))
    }

    fn upgrade(&self, path: &Path, password: Option<&str>) -> DriverResult<()> {
        self.upgrade_calls.set(self.upgrade_calls.get() + 1);

        if !path.exists() {
            return Err(DriverError::new(
                DriverErrorKind::FileNotFound,
                format!("The database file cannot be found: {}", path.display()),
            ));
        }
        self.check_password(password)?;

        match self.upgrade_behavior {
            UpgradeBehavior::Succeeds => {
                fs::write(path, b"upgraded database image")
                    .map_err(|e| DriverError::new(DriverErrorKind::Other, e.to_string()))?;
                self.old_format.set(false);
                Ok(())
            }
            UpgradeBehavior::Fails => {
                // Mutate before failing, like a real interrupted rewrite.
                let _ = fs::write(path, b"half-upgraded wreckage");
                Err(DriverError::new(
                    DriverErrorKind::Other,
                    "The upgrade could not be completed.",
                ))
            }
        }
    }
}

/// Connection over the in-memory tables.
pub struct MemoryConnection {
    tables: Vec<MemoryTable>,
}

impl MemoryConnection {
    fn table(&self, name: &str) -> DriverResult<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                DriverError::new(
                    DriverErrorKind::Other,
                    format!("The specified table does not exist: {name}"),
                )
            })
    }
}

impl SdfConnection for MemoryConnection {
    fn table_names(&self) -> DriverResult<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn row_count(&self, table: &str) -> DriverResult<u64> {
        Ok(self.table(table)?.rows.len() as u64)
    }

    fn columns(&self, table: &str) -> DriverResult<Vec<ColumnDescriptor>> {
        Ok(self.table(table)?.columns.clone())
    }

    fn select<'c>(
        &'c self,
        table: &str,
        columns: &[String],
        order_by: Option<&str>,
    ) -> DriverResult<Box<dyn RowCursor + 'c>> {
        let table = self.table(table)?;

        let indices = columns
            .iter()
            .map(|name| {
                table.column_index(name).ok_or_else(|| {
                    DriverError::new(
                        DriverErrorKind::Other,
                        format!("The column name is not valid: {name}"),
                    )
                })
            })
            .collect::<DriverResult<Vec<_>>>()?;

        let mut rows = table.rows.clone();
        if let Some(order_col) = order_by {
            let idx = table.column_index(order_col).ok_or_else(|| {
                DriverError::new(
                    DriverErrorKind::Other,
                    format!("The column name is not valid: {order_col}"),
                )
            })?;
            rows.sort_by(|a, b| compare_values(&a[idx], &b[idx]));
        }

        let width = table.columns.len();
        let projected = rows
            .into_iter()
            .map(|row| {
                if row.len() != width {
                    // Malformed fixture rows pass through unprojected.
                    return row;
                }
                indices.iter().map(|&i| row[i].clone()).collect()
            })
            .collect();

        Ok(Box::new(MemoryCursor { rows: projected }))
    }
}

/// Total order good enough for ORDER BY in fixtures: NULLs first, then by
/// value within the comparable families.
fn compare_values(a: &CeValue, b: &CeValue) -> Ordering {
    use CeValue::*;

    fn as_i64(v: &CeValue) -> Option<i64> {
        match v {
            I16(x) => Some(i64::from(*x)),
            I32(x) => Some(i64::from(*x)),
            I64(x) => Some(*x),
            _ => None,
        }
    }

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (DateTime(x), DateTime(y)) => x.cmp(y),
        (Text(x), Text(y)) => x.cmp(y),
        _ => match (as_i64(a), as_i64(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        },
    }
}

struct MemoryCursor {
    rows: VecDeque<Vec<CeValue>>,
}

impl RowCursor for MemoryCursor {
    fn next_row(&mut self) -> DriverResult<Option<Vec<CeValue>>> {
        Ok(self.rows.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> MemoryTable {
        MemoryTable::new("CHECKINOUT")
            .with_column("USERID", "int", false)
            .with_column("CHECKTIME", "datetime", false)
            .with_row(vec![
                CeValue::I32(2),
                CeValue::DateTime(
                    NaiveDate::from_ymd_opt(2024, 1, 16)
                        .unwrap()
                        .and_hms_opt(9, 0, 0)
                        .unwrap(),
                ),
            ])
            .with_row(vec![
                CeValue::I32(1),
                CeValue::DateTime(
                    NaiveDate::from_ymd_opt(2024, 1, 15)
                        .unwrap()
                        .and_hms_opt(8, 30, 0)
                        .unwrap(),
                ),
            ])
    }

    #[test]
    fn test_select_orders_and_projects() {
        let conn = MemoryConnection {
            tables: vec![sample()],
        };
        let mut cursor = conn
            .select(
                "checkinout",
                &["USERID".to_string()],
                Some("CHECKTIME"),
            )
            .unwrap();

        assert_eq!(cursor.next_row().unwrap(), Some(vec![CeValue::I32(1)]));
        assert_eq!(cursor.next_row().unwrap(), Some(vec![CeValue::I32(2)]));
        assert_eq!(cursor.next_row().unwrap(), None);
    }

    #[test]
    fn test_unknown_table_errors() {
        let conn = MemoryConnection { tables: vec![] };
        assert!(conn.row_count("NOPE").is_err());
    }
}

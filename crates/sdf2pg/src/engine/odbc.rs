//! ODBC-backed engine for real `.sdf` files.
//!
//! Requires a platform ODBC driver capable of opening SQL Server Compact
//! files (configured by name, since vendor driver naming varies) and the
//! `odbc` cargo feature. The driver must support the connect-time
//! `Upgrade=1` attribute for in-place format upgrades.
//!
//! Result sets are fetched through text buffers and decoded to typed
//! values from the declared column types, so one code path covers the
//! whole SSCE type system. Row selects stream one fetch buffer at a time,
//! so peak memory is bounded by the buffer, not the table.

use std::collections::VecDeque;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use odbc_api::buffers::TextRowSet;
use odbc_api::handles::StatementConnection;
use odbc_api::{
    BlockCursor, ConnectionOptions, Cursor, CursorImpl, Environment, ResultSetMetadata,
};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::schema::ColumnDescriptor;
use crate::value::CeValue;

use super::{
    DriverError, DriverErrorKind, DriverResult, RowCursor, SdfConnection, SdfDriver,
    NATIVE_FILE_SHARING_VIOLATION, NATIVE_OLDER_FORMAT, NATIVE_PASSWORD_MISMATCH,
};

/// Rows fetched per ODBC round trip.
const FETCH_BATCH_ROWS: usize = 5000;

/// Max bytes per text cell in the fetch buffer.
const MAX_CELL_BYTES: usize = 65536;

/// Escape a bracket-quoted identifier: `Table]Name` -> `Table]]Name`.
fn escape_ident(s: &str) -> String {
    s.replace(']', "]]")
}

/// Escape a string literal: `O'Brien` -> `O''Brien`.
fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Map an ODBC failure onto a classified driver error. The native code is
/// recovered from the diagnostic text because drivers disagree on where
/// they surface it.
fn classify_odbc(err: &odbc_api::Error) -> DriverError {
    let text = err.to_string();
    let code = [
        NATIVE_OLDER_FORMAT,
        NATIVE_PASSWORD_MISMATCH,
        NATIVE_FILE_SHARING_VIOLATION,
    ]
    .into_iter()
    .find(|c| text.contains(&c.to_string()));
    DriverError::classify(code, text)
}

/// Process-global ODBC environment; connections from it carry no borrow,
/// so a cursor can own its connection and outlive the `select` call.
fn environment() -> DriverResult<&'static Environment> {
    odbc_api::environment().map_err(|e| {
        DriverError::new(
            DriverErrorKind::Other,
            format!(
                "Failed to create ODBC environment: {e}. \
                 Make sure an ODBC driver manager is installed."
            ),
        )
    })
}

/// ODBC-backed [`SdfDriver`].
pub struct OdbcDriver {
    driver_name: String,
}

impl OdbcDriver {
    /// Create a driver using the given platform ODBC driver name.
    pub fn new(driver_name: impl Into<String>) -> DriverResult<Self> {
        // Fail now, not on first open, when no driver manager is present.
        environment()?;
        Ok(Self {
            driver_name: driver_name.into(),
        })
    }

    fn connection_string(&self, path: &Path, password: Option<&str>, upgrade: bool) -> String {
        let mut conn_str = format!(
            "Driver={{{}}};Data Source={};",
            self.driver_name,
            path.display()
        );
        if let Some(pw) = password {
            conn_str.push_str(&format!("Password={pw};"));
        }
        if upgrade {
            conn_str.push_str("Upgrade=1;");
        }
        conn_str
    }
}

impl SdfDriver for OdbcDriver {
    fn open(&self, path: &Path, password: Option<&str>) -> DriverResult<Box<dyn SdfConnection>> {
        if !path.exists() {
            return Err(DriverError::new(
                DriverErrorKind::FileNotFound,
                format!("The database file cannot be found: {}", path.display()),
            ));
        }

        let conn_str = self.connection_string(path, password, false);
        // Probe the connection once up front so open failures classify here
        // rather than on the first query.
        environment()?
            .connect_with_connection_string(&conn_str, ConnectionOptions::default())
            .map_err(|e| classify_odbc(&e))?;

        info!("Opened {} via ODBC", path.display());
        Ok(Box::new(OdbcConnection { conn_str }))
    }

    fn upgrade(&self, path: &Path, password: Option<&str>) -> DriverResult<()> {
        let conn_str = self.connection_string(path, password, true);
        environment()?
            .connect_with_connection_string(&conn_str, ConnectionOptions::default())
            .map(|_| ())
            .map_err(|e| classify_odbc(&e))
    }
}

/// ODBC-backed [`SdfConnection`]. A fresh connection is made per query,
/// like the file-handle model of the underlying engine.
pub struct OdbcConnection {
    conn_str: String,
}

impl OdbcConnection {
    fn connect(&self) -> DriverResult<odbc_api::Connection<'static>> {
        environment()?
            .connect_with_connection_string(&self.conn_str, ConnectionOptions::default())
            .map_err(|e| classify_odbc(&e))
    }

    /// Run a catalog query and collect the full (small) result.
    fn query_text(&self, sql: &str) -> DriverResult<Vec<Vec<Option<String>>>> {
        debug!("ODBC query: {sql}");
        let conn = self.connect()?;

        let mut rows = Vec::new();

        if let Some(mut cursor) = conn.execute(sql, ()).map_err(|e| classify_odbc(&e))? {
            let num_cols = cursor.num_result_cols().map_err(|e| {
                DriverError::new(DriverErrorKind::Other, format!("column count: {e}"))
            })? as usize;

            let mut buffers =
                TextRowSet::for_cursor(FETCH_BATCH_ROWS, &mut cursor, Some(MAX_CELL_BYTES))
                    .map_err(|e| {
                        DriverError::new(DriverErrorKind::Other, format!("row buffer: {e}"))
                    })?;
            let mut row_cursor = cursor
                .bind_buffer(&mut buffers)
                .map_err(|e| DriverError::new(DriverErrorKind::Other, format!("bind: {e}")))?;

            while let Some(batch) = row_cursor
                .fetch()
                .map_err(|e| DriverError::new(DriverErrorKind::Other, format!("fetch: {e}")))?
            {
                for row_idx in 0..batch.num_rows() {
                    let mut row = Vec::with_capacity(num_cols);
                    for col_idx in 0..num_cols {
                        let value = batch
                            .at(col_idx, row_idx)
                            .map(|bytes| String::from_utf8_lossy(bytes).to_string());
                        row.push(value);
                    }
                    rows.push(row);
                }
            }
        }

        Ok(rows)
    }
}

impl SdfConnection for OdbcConnection {
    fn table_names(&self) -> DriverResult<Vec<String>> {
        let rows = self.query_text(
            "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'TABLE'",
        )?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.into_iter().next().flatten())
            .collect())
    }

    fn row_count(&self, table: &str) -> DriverResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM [{}]", escape_ident(table));
        let rows = self.query_text(&sql)?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0))
    }

    fn columns(&self, table: &str) -> DriverResult<Vec<ColumnDescriptor>> {
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE, ORDINAL_POSITION \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_NAME = '{}' \
             ORDER BY ORDINAL_POSITION",
            escape_literal(table)
        );
        let rows = self.query_text(&sql)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut it = row.into_iter();
                let name = it.next().flatten()?;
                let data_type = it.next().flatten().unwrap_or_default();
                let is_nullable = it
                    .next()
                    .flatten()
                    .is_some_and(|v| v.eq_ignore_ascii_case("YES"));
                let ordinal = it.next().flatten().and_then(|v| v.parse().ok()).unwrap_or(0);
                Some(ColumnDescriptor {
                    name,
                    data_type,
                    is_nullable,
                    ordinal,
                })
            })
            .collect())
    }

    fn select<'c>(
        &'c self,
        table: &str,
        columns: &[String],
        order_by: Option<&str>,
    ) -> DriverResult<Box<dyn RowCursor + 'c>> {
        let declared = self.columns(table)?;
        let types: Vec<String> = columns
            .iter()
            .map(|name| {
                declared
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .map(|c| c.data_type.to_lowercase())
                    .unwrap_or_else(|| "nvarchar".to_string())
            })
            .collect();

        let col_list = columns
            .iter()
            .map(|c| format!("[{}]", escape_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM [{}]", col_list, escape_ident(table));
        if let Some(order_col) = order_by {
            sql.push_str(&format!(" ORDER BY [{}] ASC", escape_ident(order_col)));
        }
        debug!("ODBC query: {sql}");

        // The cursor owns its connection, so rows stream out of the select
        // one fetch buffer at a time instead of being collected up front.
        let conn = self.connect()?;
        let mut cursor = conn
            .into_cursor(&sql, ())
            .map_err(|e| classify_odbc(&e.error))?
            .ok_or_else(|| {
                DriverError::new(
                    DriverErrorKind::Other,
                    format!("statement produced no result set: {sql}"),
                )
            })?;

        let buffers = TextRowSet::for_cursor(FETCH_BATCH_ROWS, &mut cursor, Some(MAX_CELL_BYTES))
            .map_err(|e| DriverError::new(DriverErrorKind::Other, format!("row buffer: {e}")))?;
        let block = cursor
            .bind_buffer(buffers)
            .map_err(|e| DriverError::new(DriverErrorKind::Other, format!("bind: {e}")))?;

        Ok(Box::new(OdbcCursor {
            block,
            types,
            pending: VecDeque::new(),
            done: false,
        }))
    }
}

/// Streams rows out of a bound ODBC block cursor, decoding one fetched
/// buffer of at most [`FETCH_BATCH_ROWS`] rows at a time.
struct OdbcCursor {
    block: BlockCursor<CursorImpl<StatementConnection<'static>>, TextRowSet>,
    types: Vec<String>,
    pending: VecDeque<Vec<CeValue>>,
    done: bool,
}

impl RowCursor for OdbcCursor {
    fn next_row(&mut self) -> DriverResult<Option<Vec<CeValue>>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }

            let Self {
                block,
                types,
                pending,
                done,
            } = self;
            match block
                .fetch()
                .map_err(|e| DriverError::new(DriverErrorKind::Other, format!("fetch: {e}")))?
            {
                Some(batch) => {
                    for row_idx in 0..batch.num_rows() {
                        let row = types
                            .iter()
                            .enumerate()
                            .map(|(col_idx, data_type)| {
                                let text = batch
                                    .at(col_idx, row_idx)
                                    .map(|bytes| String::from_utf8_lossy(bytes).to_string());
                                decode_text(text, data_type)
                            })
                            .collect();
                        pending.push_back(row);
                    }
                }
                None => *done = true,
            }
        }
    }
}

/// Decode one text cell into a typed value based on the declared type.
/// Anything that fails to parse falls back to text so no data is dropped
/// at this layer; validation happens in the pipeline.
fn decode_text(text: Option<String>, data_type: &str) -> CeValue {
    let Some(text) = text else {
        return CeValue::Null;
    };

    match data_type {
        "bit" => match text.as_str() {
            "1" | "true" => CeValue::Bool(true),
            "0" | "false" => CeValue::Bool(false),
            _ => CeValue::Text(text),
        },
        "tinyint" | "smallint" => text
            .parse::<i16>()
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::I16),
        "int" | "integer" => text
            .parse::<i32>()
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::I32),
        "bigint" => text
            .parse::<i64>()
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::I64),
        "real" => text
            .parse::<f32>()
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::F32),
        "float" => text
            .parse::<f64>()
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::F64),
        "numeric" | "money" => Decimal::from_str(&text)
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::Decimal),
        "uniqueidentifier" => Uuid::from_str(text.trim_matches(['{', '}']))
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::Uuid),
        "datetime" => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f"))
            .map_or_else(|_| CeValue::Text(text.clone()), CeValue::DateTime),
        "binary" | "varbinary" | "image" | "rowversion" | "timestamp" => {
            decode_hex(&text).map_or(CeValue::Text(text), CeValue::Bytes)
        }
        _ => CeValue::Text(text),
    }
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let raw = text.strip_prefix("0x").unwrap_or(text);
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_ident() {
        assert_eq!(escape_ident("plain"), "plain");
        assert_eq!(escape_ident("odd]name"), "odd]]name");
    }

    #[test]
    fn test_decode_text_types() {
        assert_eq!(decode_text(None, "int"), CeValue::Null);
        assert_eq!(decode_text(Some("7".into()), "int"), CeValue::I32(7));
        assert_eq!(decode_text(Some("1".into()), "bit"), CeValue::Bool(true));
        assert_eq!(
            decode_text(Some("2024-01-15 08:30:00".into()), "datetime"),
            CeValue::DateTime(
                chrono::NaiveDate::from_ymd_opt(2024, 1, 15)
                    .unwrap()
                    .and_hms_opt(8, 30, 0)
                    .unwrap()
            )
        );
        assert_eq!(
            decode_text(Some("0xdead".into()), "varbinary"),
            CeValue::Bytes(vec![0xde, 0xad])
        );
        // Unparsable values survive as text for the pipeline to judge.
        assert_eq!(
            decode_text(Some("junk".into()), "int"),
            CeValue::Text("junk".to_string())
        );
    }
}

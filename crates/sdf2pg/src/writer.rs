//! PostgreSQL script generation: statement assembly and literal escaping.
//!
//! The writer is stateless formatting. One multi-row `INSERT` is emitted per
//! batch (one statement per row would be an order of magnitude slower to
//! replay), with an `ON CONFLICT ... DO NOTHING` clause so re-applying an
//! overlapping export is idempotent.

use std::io::{self, Write};

use chrono::{SecondsFormat, Utc};

use crate::schema::TargetField;
use crate::value::{AttendanceRecord, CeValue};

/// Quote a PostgreSQL identifier, doubling embedded double quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a string literal with single-quote doubling.
fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a scalar as a PostgreSQL literal.
#[must_use]
pub fn value_literal(value: &CeValue) -> String {
    match value {
        CeValue::Null => "NULL".to_string(),
        CeValue::Bool(true) => "TRUE".to_string(),
        CeValue::Bool(false) => "FALSE".to_string(),
        CeValue::I16(v) => v.to_string(),
        CeValue::I32(v) => v.to_string(),
        CeValue::I64(v) => v.to_string(),
        CeValue::F32(v) => float_literal(f64::from(*v)),
        CeValue::F64(v) => float_literal(*v),
        CeValue::Decimal(v) => v.to_string(),
        CeValue::Text(v) => string_literal(v),
        CeValue::Bytes(v) => bytes_literal(v),
        CeValue::Uuid(v) => format!("'{v}'"),
        CeValue::DateTime(v) => format!("'{}'", v.format("%Y-%m-%dT%H:%M:%S%.f")),
    }
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "'NaN'".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "'Infinity'" } else { "'-Infinity'" }.to_string()
    } else {
        v.to_string()
    }
}

fn bytes_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 4);
    out.push_str("'\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out.push('\'');
    out
}

/// Provenance recorded in the output header.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    /// Source file name (display form).
    pub source_file: String,

    /// Source table name.
    pub source_table: String,

    /// Source row count at discovery time.
    pub row_count: u64,
}

/// Writes PostgreSQL statements for one target table.
#[derive(Debug, Clone)]
pub struct PgScriptWriter {
    target_schema: String,
    target_table: String,
}

impl PgScriptWriter {
    /// Create a writer targeting `<schema>.<table>`.
    pub fn new(target_schema: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            target_schema: target_schema.into(),
            target_table: target_table.into(),
        }
    }

    /// Schema-qualified, quoted target table name.
    #[must_use]
    pub fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.target_schema),
            quote_ident(&self.target_table)
        )
    }

    /// Emit the provenance comment block.
    pub fn write_header<W: Write>(&self, out: &mut W, meta: &SourceMetadata) -> io::Result<()> {
        writeln!(out, "-- Exported by sdf2pg")?;
        writeln!(out, "-- Source file:  {}", meta.source_file)?;
        writeln!(
            out,
            "-- Source table: {} ({} rows)",
            meta.source_table, meta.row_count
        )?;
        writeln!(
            out,
            "-- Generated:    {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(out)
    }

    /// Emit one multi-row INSERT for a batch of semantic records.
    ///
    /// The conflict key is the natural uniqueness of a punch: one person
    /// cannot clock twice at the same instant.
    pub fn write_batch<W: Write>(
        &self,
        out: &mut W,
        records: &[AttendanceRecord],
    ) -> io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let columns: Vec<String> = TargetField::ALL
            .iter()
            .map(|f| quote_ident(f.column_name()))
            .collect();

        writeln!(
            out,
            "INSERT INTO {} ({}) VALUES",
            self.qualified_table(),
            columns.join(", ")
        )?;

        for (i, record) in records.iter().enumerate() {
            let terminator = if i + 1 == records.len() { "" } else { "," };
            writeln!(
                out,
                "  ({}, '{}', {}){}",
                record.user_id,
                record
                    .check_time
                    .to_rfc3339_opts(SecondsFormat::AutoSi, false),
                record.verify_type,
                terminator
            )?;
        }

        writeln!(
            out,
            "ON CONFLICT ({}, {}) DO NOTHING;",
            quote_ident(TargetField::UserId.column_name()),
            quote_ident(TargetField::CheckTime.column_name())
        )?;
        writeln!(out)
    }

    /// Emit one multi-row INSERT for a batch of raw rows.
    ///
    /// `columns` are the source column names in row order;
    /// `conflict_columns` key the DO NOTHING clause and may be empty when
    /// the table has no recognizable natural key (plain INSERT then).
    pub fn write_dynamic_batch<W: Write>(
        &self,
        out: &mut W,
        rows: &[Vec<CeValue>],
        columns: &[String],
        conflict_columns: &[String],
    ) -> io::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        writeln!(
            out,
            "INSERT INTO {} ({}) VALUES",
            self.qualified_table(),
            quoted.join(", ")
        )?;

        for (i, row) in rows.iter().enumerate() {
            let values: Vec<String> = row.iter().map(value_literal).collect();
            let terminator = if i + 1 == rows.len() { "" } else { "," };
            writeln!(out, "  ({}){}", values.join(", "), terminator)?;
        }

        if conflict_columns.is_empty() {
            writeln!(out, ";")?;
        } else {
            let keys: Vec<String> = conflict_columns.iter().map(|c| quote_ident(c)).collect();
            writeln!(out, "ON CONFLICT ({}) DO NOTHING;", keys.join(", "))?;
        }
        writeln!(out)
    }
}

/// An `io::Write` wrapper that counts bytes written.
///
/// The pipeline reports the flushed output size in its outcome; counting at
/// the sink keeps that exact whatever formatting the writer emits.
pub struct CountingWriter<W> {
    inner: W,
    bytes: u64,
}

impl<W: Write> CountingWriter<W> {
    /// Wrap a sink.
    pub fn new(inner: W) -> Self {
        Self { inner, bytes: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Unwrap the inner sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn record(user_id: i32, verify: i16) -> AttendanceRecord {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        AttendanceRecord {
            user_id,
            check_time: offset.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap(),
            verify_type: verify,
        }
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("name"), "\"name\"");
        assert_eq!(quote_ident("od\"d"), "\"od\"\"d\"");
    }

    #[test]
    fn test_value_literals() {
        assert_eq!(value_literal(&CeValue::Null), "NULL");
        assert_eq!(value_literal(&CeValue::Bool(true)), "TRUE");
        assert_eq!(value_literal(&CeValue::I32(-7)), "-7");
        assert_eq!(
            value_literal(&CeValue::Text("O'Brien".to_string())),
            "'O''Brien'"
        );
        assert_eq!(
            value_literal(&CeValue::Bytes(vec![0xde, 0xad])),
            "'\\xdead'"
        );
        assert_eq!(
            value_literal(&CeValue::Decimal(Decimal::new(1250, 2))),
            "12.50"
        );
        assert_eq!(value_literal(&CeValue::F64(f64::NAN)), "'NaN'");

        let uuid = Uuid::nil();
        assert_eq!(
            value_literal(&CeValue::Uuid(uuid)),
            "'00000000-0000-0000-0000-000000000000'"
        );

        let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            value_literal(&CeValue::DateTime(dt)),
            "'2024-01-15T08:30:00'"
        );
    }

    #[test]
    fn test_write_header_names_provenance() {
        let writer = PgScriptWriter::new("public", "checkinout");
        let mut out = Vec::new();
        writer
            .write_header(
                &mut out,
                &SourceMetadata {
                    source_file: "att.sdf".to_string(),
                    source_table: "CHECKINOUT".to_string(),
                    row_count: 2500,
                },
            )
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("att.sdf"));
        assert!(text.contains("CHECKINOUT (2500 rows)"));
        assert!(text.contains("-- Generated:"));
    }

    #[test]
    fn test_write_batch_shape() {
        let writer = PgScriptWriter::new("public", "checkinout");
        let mut out = Vec::new();
        writer
            .write_batch(&mut out, &[record(7, 1), record(8, 0)])
            .unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with(
            "INSERT INTO \"public\".\"checkinout\" (\"user_id\", \"check_time\", \"verify_type\") VALUES\n"
        ));
        assert!(text.contains("  (7, '2024-01-15T08:30:00-05:00', 1),\n"));
        assert!(text.contains("  (8, '2024-01-15T08:30:00-05:00', 0)\n"));
        assert!(text.contains("ON CONFLICT (\"user_id\", \"check_time\") DO NOTHING;\n"));
        // Exactly one statement for one batch.
        assert_eq!(text.matches("INSERT INTO").count(), 1);
    }

    #[test]
    fn test_write_batch_empty_is_silent() {
        let writer = PgScriptWriter::new("public", "checkinout");
        let mut out = Vec::new();
        writer.write_batch(&mut out, &[]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_write_dynamic_batch_with_and_without_key() {
        let writer = PgScriptWriter::new("public", "userinfo");
        let columns = vec!["USERID".to_string(), "NAME".to_string()];
        let rows = vec![vec![CeValue::I32(1), CeValue::Text("Ada".to_string())]];

        let mut keyed = Vec::new();
        writer
            .write_dynamic_batch(&mut keyed, &rows, &columns, &[columns[0].clone()])
            .unwrap();
        let keyed = String::from_utf8(keyed).unwrap();
        assert!(keyed.contains("ON CONFLICT (\"USERID\") DO NOTHING;"));
        assert!(keyed.contains("(1, 'Ada')"));

        let mut plain = Vec::new();
        writer
            .write_dynamic_batch(&mut plain, &rows, &columns, &[])
            .unwrap();
        let plain = String::from_utf8(plain).unwrap();
        assert!(!plain.contains("ON CONFLICT"));
        assert!(plain.trim_end().ends_with(';'));
    }

    #[test]
    fn test_counting_writer_tracks_bytes() {
        let mut w = CountingWriter::new(Vec::new());
        w.write_all(b"hello").unwrap();
        assert_eq!(w.bytes_written(), 5);
    }
}

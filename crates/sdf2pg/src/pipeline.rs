//! Read-map-validate-batch-write conversion pipelines.
//!
//! Two modes share the skip-and-warn policy: one malformed historical punch
//! must never abort a multi-hour export.
//!
//! - Semantic mode reads exactly the mapped columns, validates and converts
//!   each row into an [`AttendanceRecord`], and holds the accepted set in
//!   memory. It exists for ordinary attendance tables (tens of thousands of
//!   rows), not for arbitrary bulk data.
//! - Raw mode streams every declared column of a table through a fixed-size
//!   batch, bounding peak memory to one batch regardless of table size.

use std::io::Write;

use chrono::{DateTime, FixedOffset, LocalResult, Local, NaiveDateTime, TimeZone};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::SdfConnection;
use crate::error::Result;
use crate::schema::{RawTableSchema, ResolvedSchema, TargetField};
use crate::value::{AttendanceRecord, CeValue};
use crate::writer::{CountingWriter, PgScriptWriter, SourceMetadata};

/// Records per emitted INSERT statement, and the peak number of rows held
/// in memory by the streaming path.
pub const BATCH_SIZE: usize = 1000;

/// Progress callback cadence, in processed rows.
pub const PROGRESS_INTERVAL: u64 = 100;

/// Inline progress sink: receives the cumulative processed-row count
/// (including skipped rows, so displays advance monotonically).
pub type ProgressSink<'a> = &'a mut dyn FnMut(u64);

/// Result of a semantic read.
#[derive(Debug)]
pub struct ReadOutcome {
    /// Accepted, validated records in timestamp order.
    pub records: Vec<AttendanceRecord>,

    /// Rows dropped by validation.
    pub skipped: u64,

    /// One entry per data problem, row-numbered.
    pub warnings: Vec<String>,
}

/// Final accounting of one export run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportOutcome {
    /// Records emitted into the script.
    pub records_written: u64,

    /// Rows dropped by validation.
    pub records_skipped: u64,

    /// Multi-row INSERT statements emitted.
    pub batch_count: u64,

    /// Bytes written to the sink, measured after the final flush.
    pub bytes_written: u64,

    /// Ordered, human-readable data-quality warnings.
    pub warnings: Vec<String>,
}

/// Read and convert the mapped columns of the attendance table.
///
/// Issues a single SELECT over exactly the mapped source columns, ordered
/// ascending by the mapped timestamp column so output is reproducible, and
/// converts row by row:
///
/// - identifier: required; skipped (with a row-numbered warning) when null,
///   unconvertible, or not strictly positive;
/// - timestamp: required; the naive value is pinned to the machine's UTC
///   offset at that local time, DST included, matching what the source
///   device's clock recorded; skipped when null or unconvertible;
/// - verify code: optional; defaults to zero on null or unconvertible
///   values with a non-fatal warning. An entirely unmapped verify column is
///   not a warning.
pub fn read_records(
    conn: &dyn SdfConnection,
    resolved: &ResolvedSchema,
    mut progress: Option<ProgressSink<'_>>,
) -> Result<ReadOutcome> {
    // Required mappings are guaranteed by resolution.
    let user_col = resolved
        .mapping_for(TargetField::UserId)
        .map(|m| m.source_column.clone())
        .unwrap_or_default();
    let time_col = resolved
        .mapping_for(TargetField::CheckTime)
        .map(|m| m.source_column.clone())
        .unwrap_or_default();
    let verify_col = resolved
        .mapping_for(TargetField::VerifyType)
        .map(|m| m.source_column.clone());

    let mut columns = vec![user_col, time_col.clone()];
    if let Some(ref v) = verify_col {
        columns.push(v.clone());
    }

    let mut cursor = conn.select(&resolved.table, &columns, Some(&time_col))?;

    let mut records = Vec::new();
    let mut skipped: u64 = 0;
    let mut warnings = Vec::new();
    let mut processed: u64 = 0;

    while let Some(row) = cursor.next_row()? {
        processed += 1;

        match convert_row(&row, verify_col.is_some(), processed, &mut warnings) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }

        if processed % PROGRESS_INTERVAL == 0 {
            report(&mut progress, processed);
        }
    }
    if processed % PROGRESS_INTERVAL != 0 {
        report(&mut progress, processed);
    }

    info!(
        "Read {} rows from {}: {} accepted, {} skipped",
        processed,
        resolved.table,
        records.len(),
        skipped
    );
    Ok(ReadOutcome {
        records,
        skipped,
        warnings,
    })
}

/// Semantic export: read everything, then write batches of [`BATCH_SIZE`].
///
/// The sink is flushed on every exit path; `bytes_written` is measured
/// after that flush.
pub fn export_semantic<W: Write>(
    conn: &dyn SdfConnection,
    resolved: &ResolvedSchema,
    sink: W,
    writer: &PgScriptWriter,
    meta: &SourceMetadata,
    progress: Option<ProgressSink<'_>>,
) -> Result<ExportOutcome> {
    let mut out = CountingWriter::new(sink);

    let result = (|| -> Result<ExportOutcome> {
        writer.write_header(&mut out, meta)?;

        let read = read_records(conn, resolved, progress)?;

        let mut batch_count: u64 = 0;
        for chunk in read.records.chunks(BATCH_SIZE) {
            writer.write_batch(&mut out, chunk)?;
            batch_count += 1;
        }

        Ok(ExportOutcome {
            records_written: read.records.len() as u64,
            records_skipped: read.skipped,
            batch_count,
            bytes_written: 0,
            warnings: read.warnings,
        })
    })();

    let flushed = out.flush();
    let mut outcome = result?;
    flushed?;
    outcome.bytes_written = out.bytes_written();
    Ok(outcome)
}

/// Raw streaming export of every declared column, in table order.
///
/// Rows accumulate into a [`BATCH_SIZE`] buffer that is flushed as soon as
/// it fills, plus one final partial flush; peak memory is one batch. A
/// malformed row (width disagreeing with the declared schema) is skipped
/// with a warning, never fatal. Stream-level read failures (for example the
/// connection being closed underneath us) do abort.
pub fn export_table_streaming<W: Write>(
    conn: &dyn SdfConnection,
    raw: &RawTableSchema,
    sink: W,
    writer: &PgScriptWriter,
    meta: &SourceMetadata,
    mut progress: Option<ProgressSink<'_>>,
) -> Result<ExportOutcome> {
    let mut out = CountingWriter::new(sink);
    let columns = raw.column_names();
    let conflict = natural_key_columns(raw);

    let result = (|| -> Result<ExportOutcome> {
        writer.write_header(&mut out, meta)?;

        let mut cursor = conn.select(&raw.table, &columns, None)?;

        let mut batch: Vec<Vec<CeValue>> = Vec::with_capacity(BATCH_SIZE);
        let mut outcome = ExportOutcome::default();
        let mut processed: u64 = 0;

        while let Some(row) = cursor.next_row()? {
            processed += 1;

            if row.len() != columns.len() {
                outcome.records_skipped += 1;
                outcome.warnings.push(format!(
                    "row {processed}: expected {} values, got {}; row skipped",
                    columns.len(),
                    row.len()
                ));
            } else {
                batch.push(row);
                if batch.len() == BATCH_SIZE {
                    writer.write_dynamic_batch(&mut out, &batch, &columns, &conflict)?;
                    outcome.records_written += batch.len() as u64;
                    outcome.batch_count += 1;
                    batch.clear();
                }
            }

            if processed % PROGRESS_INTERVAL == 0 {
                report(&mut progress, processed);
            }
        }
        if processed % PROGRESS_INTERVAL != 0 {
            report(&mut progress, processed);
        }

        if !batch.is_empty() {
            writer.write_dynamic_batch(&mut out, &batch, &columns, &conflict)?;
            outcome.records_written += batch.len() as u64;
            outcome.batch_count += 1;
        }

        info!(
            "Streamed {} of {} rows from {} in {} batches",
            outcome.records_written, processed, raw.table, outcome.batch_count
        );
        Ok(outcome)
    })();

    let flushed = out.flush();
    let mut outcome = result?;
    flushed?;
    outcome.bytes_written = out.bytes_written();
    Ok(outcome)
}

/// Conflict key for raw export: the identifier and timestamp columns when
/// both are recognizable by name, otherwise none (plain INSERT).
fn natural_key_columns(raw: &RawTableSchema) -> Vec<String> {
    let find = |field: TargetField| {
        raw.columns.iter().find(|c| {
            field
                .name_variants()
                .iter()
                .any(|v| c.name.eq_ignore_ascii_case(v))
        })
    };

    match (find(TargetField::UserId), find(TargetField::CheckTime)) {
        (Some(user), Some(time)) => vec![user.name.clone(), time.name.clone()],
        _ => Vec::new(),
    }
}

fn report(progress: &mut Option<ProgressSink<'_>>, processed: u64) {
    if let Some(sink) = progress.as_mut() {
        sink(processed);
    }
}

/// Convert one row; `None` means the row is skipped (a warning has been
/// recorded). Required fields skip on failure; the optional verify code
/// defaults to zero on failure instead, to retain as much history as
/// possible.
fn convert_row(
    row: &[CeValue],
    has_verify: bool,
    row_number: u64,
    warnings: &mut Vec<String>,
) -> Option<AttendanceRecord> {
    let user_value = row.first().unwrap_or(&CeValue::Null);
    let user_id = match to_i32(user_value) {
        Some(id) if id > 0 => id,
        Some(id) => {
            warnings.push(format!(
                "row {row_number}: identifier {id} is not positive; row skipped"
            ));
            return None;
        }
        None => {
            warnings.push(format!(
                "row {row_number}: identifier value ({}) is not convertible; row skipped",
                user_value.type_name()
            ));
            return None;
        }
    };

    let time_value = row.get(1).unwrap_or(&CeValue::Null);
    let naive = match to_naive_datetime(time_value) {
        Some(naive) => naive,
        None => {
            warnings.push(format!(
                "row {row_number}: timestamp value ({}) is not convertible; row skipped",
                time_value.type_name()
            ));
            return None;
        }
    };
    let check_time = match attach_zone_offset(&Local, &naive) {
        Some(dt) => dt,
        None => {
            // Local time that never existed (spring-forward gap).
            warnings.push(format!(
                "row {row_number}: timestamp {naive} does not exist in the local timezone; row skipped"
            ));
            return None;
        }
    };

    let verify_type = if has_verify {
        let verify_value = row.get(2).unwrap_or(&CeValue::Null);
        match to_i16(verify_value) {
            Some(code) => code,
            None => {
                warnings.push(format!(
                    "row {row_number}: verify code ({}) is not convertible; defaulting to 0",
                    verify_value.type_name()
                ));
                0
            }
        }
    } else {
        0
    };

    debug!("row {row_number}: accepted user {user_id}");
    Some(AttendanceRecord {
        user_id,
        check_time,
        verify_type,
    })
}

/// Pin a naive local timestamp to the offset the given timezone had at
/// that wall-clock time. A DST fold picks the chronologically earlier of
/// the two occurrences; a nonexistent time yields `None`.
pub(crate) fn attach_zone_offset<Tz: TimeZone>(
    tz: &Tz,
    naive: &NaiveDateTime,
) -> Option<DateTime<FixedOffset>> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt.fixed_offset()),
        LocalResult::Ambiguous(a, b) => {
            // The tuple order is not guaranteed to be by instant, so
            // compare explicitly.
            let earliest = std::cmp::min_by_key(a, b, |dt| dt.naive_utc());
            warn!("ambiguous local time {naive}; using the earlier occurrence");
            Some(earliest.fixed_offset())
        }
        LocalResult::None => None,
    }
}

fn to_i32(value: &CeValue) -> Option<i32> {
    match value {
        CeValue::I16(v) => Some(i32::from(*v)),
        CeValue::I32(v) => Some(*v),
        CeValue::I64(v) => i32::try_from(*v).ok(),
        CeValue::Decimal(v) => v.to_i32(),
        CeValue::F64(v) if v.fract() == 0.0 => {
            let v = *v;
            (v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX)).then(|| v as i32)
        }
        CeValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_i16(value: &CeValue) -> Option<i16> {
    match value {
        CeValue::Bool(v) => Some(i16::from(*v)),
        CeValue::I16(v) => Some(*v),
        CeValue::I32(v) => i16::try_from(*v).ok(),
        CeValue::I64(v) => i16::try_from(*v).ok(),
        CeValue::Decimal(v) => v.to_i16(),
        CeValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_naive_datetime(value: &CeValue) -> Option<NaiveDateTime> {
    match value {
        CeValue::DateTime(v) => Some(*v),
        CeValue::Text(s) => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .ok()
        }
        _ => None,
    }
}

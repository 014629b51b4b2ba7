//! Error types for the export library.
//!
//! Connectivity and discovery failures are structured values carrying enough
//! context for the caller to decide next steps; row-level data problems are
//! never errors (they accumulate as warnings in the outcome instead).

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::DriverError;
use crate::schema::{TableDescriptor, TargetField};

/// Main error type for export operations.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The source file does not exist. Immediately fatal.
    #[error("Source file not found: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// The source file is held open by another process.
    #[error(
        "Source file is locked by another process: {}. \
         Close the application using it (device sync software, for example) and retry.",
        path.display()
    )]
    SourceLocked { path: PathBuf },

    /// The operator declined to supply a password or to consent to an
    /// upgrade; the file was left untouched (beyond any backup already
    /// taken).
    #[error("Open abandoned: {reason}")]
    Abandoned { reason: String },

    /// A flag combination that cannot be acted on.
    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    /// The open state machine exceeded its attempt ceiling.
    #[error("Giving up after {attempts} open attempts; the file could not be opened")]
    RetryLimitExceeded { attempts: u32 },

    /// The database contains no user tables at all.
    #[error("No user tables found in the source database")]
    NoTablesFound,

    /// No table name matched a known attendance-table alias. Carries the
    /// full inventory so the operator can pick one explicitly.
    #[error(
        "No attendance table detected. Pass an explicit table name with --table. \
         Available tables: {}",
        format_tables(tables)
    )]
    NoAttendanceTableDetected { tables: Vec<TableDescriptor> },

    /// One or more required target fields found no column match.
    #[error(
        "Table {table} is missing required columns for {}: searched name variants [{}], \
         actual columns [{}]. Rename a column or export the table raw.",
        format_fields(missing),
        searched_variants.join(", "),
        actual_columns.join(", ")
    )]
    RequiredColumnsMissing {
        table: String,
        missing: Vec<TargetField>,
        searched_variants: Vec<String>,
        actual_columns: Vec<String>,
    },

    /// The in-place format upgrade failed. The original file has already
    /// been restored from the backup when this is surfaced.
    #[error(
        "Format upgrade of {} failed ({message}); the original file was restored from its backup",
        path.display()
    )]
    UpgradeFailed { path: PathBuf, message: String },

    /// The upgrade failed and restoring the original file also failed.
    /// The file may be half-upgraded; the backup holds the pristine bytes.
    #[error(
        "Format upgrade failed and the original could not be restored: {message}. \
         Recover the file manually from the backup at {}",
        backup.display()
    )]
    RestoreFailed { backup: PathBuf, message: String },

    /// Engine-level error that the retry state machine cannot recover from.
    #[error("Database engine error: {0}")]
    Driver(#[from] DriverError),

    /// File-system error (backup copy, output file). Partial output must be
    /// treated as untrustworthy.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExportError {
    /// Create an `Abandoned` error.
    pub fn abandoned(reason: impl Into<String>) -> Self {
        ExportError::Abandoned {
            reason: reason.into(),
        }
    }

    /// Create an `InvalidArguments` error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        ExportError::InvalidArguments {
            message: message.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for this failure.
    ///
    /// 2 is a usage error (matching the argument parser's own exit code);
    /// 3 means the operator chose to stop (no password, declined upgrade);
    /// 4 means the source file needs manual recovery from its backup; 1 is
    /// everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExportError::InvalidArguments { .. } => 2,
            ExportError::Abandoned { .. } => 3,
            ExportError::RestoreFailed { .. } => 4,
            _ => 1,
        }
    }
}

fn format_tables(tables: &[TableDescriptor]) -> String {
    tables
        .iter()
        .map(|t| format!("{} ({} rows)", t.name, t.row_count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_fields(fields: &[TargetField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_attendance_table_message_lists_inventory() {
        let err = ExportError::NoAttendanceTableDetected {
            tables: vec![
                TableDescriptor {
                    name: "USERINFO".to_string(),
                    row_count: 12,
                },
                TableDescriptor {
                    name: "DEPARTMENTS".to_string(),
                    row_count: 3,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("USERINFO (12 rows)"));
        assert!(msg.contains("DEPARTMENTS (3 rows)"));
        assert!(msg.contains("--table"));
    }

    #[test]
    fn test_exit_codes_distinguish_causes() {
        assert_eq!(ExportError::invalid_arguments("bad combo").exit_code(), 2);
        assert_eq!(ExportError::abandoned("declined").exit_code(), 3);
        assert_eq!(
            ExportError::RestoreFailed {
                backup: PathBuf::from("att.sdf.backup"),
                message: "copy failed".to_string(),
            }
            .exit_code(),
            4
        );
        assert_eq!(ExportError::NoTablesFound.exit_code(), 1);
    }

    #[test]
    fn test_required_columns_message_names_remedy() {
        let err = ExportError::RequiredColumnsMissing {
            table: "ODDLOG".to_string(),
            missing: vec![TargetField::UserId, TargetField::CheckTime],
            searched_variants: vec!["USERID".to_string(), "CHECKTIME".to_string()],
            actual_columns: vec!["A".to_string(), "B".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("user_id"));
        assert!(msg.contains("check_time"));
        assert!(msg.contains("[A, B]"));
    }
}

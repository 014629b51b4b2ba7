//! Low-level access to SQL Server Compact database files.
//!
//! There is no pure-Rust driver for the SSCE file format, so the engine is a
//! trait seam: [`SdfDriver`] opens and upgrades files, [`SdfConnection`]
//! answers catalog and row queries. The production backend lives in
//! [`odbc`] (cargo feature `odbc`); [`memory`] provides an in-memory
//! backend with scripted failure behavior for tests.
//!
//! The connection handle is exclusively owned by the opener. Discovery and
//! the pipeline only ever borrow it.

use std::fmt;
use std::path::Path;

use crate::schema::ColumnDescriptor;
use crate::value::CeValue;

pub mod memory;

#[cfg(feature = "odbc")]
pub mod odbc;

/// Native diagnostic code SSCE reports when a file was created by an older
/// engine version and must be upgraded before it can be opened.
pub const NATIVE_OLDER_FORMAT: i32 = 25138;

/// Native diagnostic code for a password mismatch on an encrypted file.
pub const NATIVE_PASSWORD_MISMATCH: i32 = 25028;

/// Native diagnostic code for a file sharing violation (file held open by
/// another process).
pub const NATIVE_FILE_SHARING_VIOLATION: i32 = 25035;

/// Classified cause of a driver failure, used by the connection opener to
/// drive its retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The file is encrypted and the supplied password (if any) is wrong.
    PasswordRequired,
    /// The file uses an older format version and needs an in-place upgrade.
    FormatTooOld,
    /// The file does not exist.
    FileNotFound,
    /// The file is held open by another process.
    FileLocked,
    /// Anything else the engine reports.
    Other,
}

/// An error reported by the underlying database engine.
#[derive(Debug, Clone)]
pub struct DriverError {
    /// Classified cause.
    pub kind: DriverErrorKind,

    /// Native engine diagnostic code, when one was reported.
    pub native_code: Option<i32>,

    /// Engine-supplied message text.
    pub message: String,
}

impl DriverError {
    /// Build an error with an explicit kind.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            native_code: None,
            message: message.into(),
        }
    }

    /// Classify a raw engine diagnostic into a [`DriverErrorKind`].
    ///
    /// The older-format and sharing-violation conditions are keyed by fixed
    /// native codes; password problems are recognized by the message text
    /// because the engine reports them under several different codes.
    pub fn classify(native_code: Option<i32>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = match native_code {
            Some(NATIVE_OLDER_FORMAT) => DriverErrorKind::FormatTooOld,
            Some(NATIVE_PASSWORD_MISMATCH) => DriverErrorKind::PasswordRequired,
            Some(NATIVE_FILE_SHARING_VIOLATION) => DriverErrorKind::FileLocked,
            _ if message.to_ascii_lowercase().contains("password") => {
                DriverErrorKind::PasswordRequired
            }
            _ => DriverErrorKind::Other,
        };
        Self {
            kind,
            native_code,
            message,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.native_code {
            Some(code) => write!(f, "{} (native error {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DriverError {}

/// Result type for driver-level operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Opens and upgrades SSCE database files.
pub trait SdfDriver {
    /// Open a database file for reading.
    ///
    /// Failures carry a [`DriverErrorKind`] the opener uses to decide
    /// whether to ask for a password, upgrade the file, or give up.
    fn open(&self, path: &Path, password: Option<&str>) -> DriverResult<Box<dyn SdfConnection>>;

    /// Upgrade a database file in place to the current format version.
    ///
    /// This mutates the file. Callers must guarantee a backup exists before
    /// invoking it.
    fn upgrade(&self, path: &Path, password: Option<&str>) -> DriverResult<()>;
}

/// An open, readable connection to a database file.
pub trait SdfConnection {
    /// Names of all user-visible tables, in no particular order.
    fn table_names(&self) -> DriverResult<Vec<String>>;

    /// Exact row count of a table.
    fn row_count(&self, table: &str) -> DriverResult<u64>;

    /// Column metadata for a table, ordered by ordinal position.
    fn columns(&self, table: &str) -> DriverResult<Vec<ColumnDescriptor>>;

    /// Stream rows of the given columns, optionally ordered ascending by
    /// one column. Values arrive in the requested column order.
    fn select<'c>(
        &'c self,
        table: &str,
        columns: &[String],
        order_by: Option<&str>,
    ) -> DriverResult<Box<dyn RowCursor + 'c>>;
}

/// A forward-only cursor over a result set.
pub trait RowCursor {
    /// Fetch the next row, or `None` at end of stream.
    fn next_row(&mut self) -> DriverResult<Option<Vec<CeValue>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_older_format() {
        let err = DriverError::classify(Some(NATIVE_OLDER_FORMAT), "older version");
        assert_eq!(err.kind, DriverErrorKind::FormatTooOld);
    }

    #[test]
    fn test_classify_password_by_message() {
        let err = DriverError::classify(None, "The database Password is invalid");
        assert_eq!(err.kind, DriverErrorKind::PasswordRequired);
    }

    #[test]
    fn test_classify_unknown() {
        let err = DriverError::classify(Some(12345), "something else");
        assert_eq!(err.kind, DriverErrorKind::Other);
        assert_eq!(err.to_string(), "something else (native error 12345)");
    }
}

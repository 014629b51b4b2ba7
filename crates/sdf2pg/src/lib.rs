//! # sdf2pg
//!
//! Exports tabular data from legacy SQL Server Compact (`.sdf`) database
//! files into PostgreSQL `INSERT` scripts.
//!
//! The library provides:
//!
//! - **Connection opening** with bounded password/upgrade negotiation and
//!   mandatory backup-before-mutate safety
//! - **Schema discovery** that heuristically locates an attendance table
//!   and maps its columns onto a fixed semantic shape, without any
//!   user-supplied schema
//! - **Conversion pipelines** (semantic and raw streaming) with
//!   skip-and-warn data-quality handling and bounded memory
//! - **Script generation** as batched multi-row `INSERT ... ON CONFLICT DO
//!   NOTHING` statements, so replaying overlapping exports is idempotent
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::path::Path;
//!
//! use sdf2pg::discovery::auto_detect;
//! use sdf2pg::engine::memory::{MemoryDriver, MemoryTable};
//! use sdf2pg::opener::ConnectionOpener;
//! use sdf2pg::pipeline::export_semantic;
//! use sdf2pg::writer::{PgScriptWriter, SourceMetadata};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = MemoryDriver::new(vec![MemoryTable::new("CHECKINOUT")]);
//!     let opener = ConnectionOpener::new(&driver);
//!
//!     let mut no_password = || None::<String>;
//!     let mut no_upgrade = |_: &Path| false;
//!     let opened = opener.open(Path::new("att.sdf"), None, &mut no_password, &mut no_upgrade)?;
//!
//!     let resolved = auto_detect(&*opened.connection)?;
//!     let writer = PgScriptWriter::new("public", "checkinout");
//!     let meta = SourceMetadata {
//!         source_file: "att.sdf".to_string(),
//!         source_table: resolved.table.clone(),
//!         row_count: resolved.row_count,
//!     };
//!
//!     let out = File::create("att.sql")?;
//!     let outcome = export_semantic(&*opened.connection, &resolved, out, &writer, &meta, None)?;
//!     println!("wrote {} records", outcome.records_written);
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod opener;
pub mod pipeline;
pub mod schema;
pub mod value;
pub mod writer;

// Re-exports for convenient access
pub use error::{ExportError, Result};
pub use opener::{ConnectionOpener, OpenedSource, PasswordSource, UpgradeConsent};
pub use pipeline::{ExportOutcome, BATCH_SIZE, PROGRESS_INTERVAL};
pub use schema::{RawTableSchema, ResolvedSchema, TableDescriptor, TargetField};
pub use value::{AttendanceRecord, CeValue};
pub use writer::{PgScriptWriter, SourceMetadata};

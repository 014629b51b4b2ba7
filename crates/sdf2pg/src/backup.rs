//! Safety backups taken before any destructive operation on the source file.
//!
//! The opener requires a backup to exist before it lets the engine run an
//! in-place format upgrade, and restores from it when the upgrade fails.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

/// Copy the source file byte-for-byte to a sibling `.backup` path and
/// return that path.
///
/// If `<file>.backup` already exists (for example from a previous run), a
/// UTC timestamp is inserted to avoid clobbering it. An existing backup is
/// never overwritten: if the timestamped path somehow exists as well, this
/// fails rather than guess.
pub fn create_backup(path: &Path) -> io::Result<PathBuf> {
    let mut backup = sibling_with_suffix(path, "backup");
    if backup.exists() {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        backup = sibling_with_suffix(path, &format!("{stamp}.backup"));
        if backup.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("backup path already exists: {}", backup.display()),
            ));
        }
    }

    fs::copy(path, &backup)?;
    info!("Created backup: {}", backup.display());
    Ok(backup)
}

/// Restore the original file byte-for-byte from its backup.
///
/// Used only when a format upgrade failed part-way; the backup itself is
/// left in place for the operator.
pub fn restore_backup(backup: &Path, original: &Path) -> io::Result<()> {
    fs::copy(backup, original)?;
    info!(
        "Restored {} from backup {}",
        original.display(),
        backup.display()
    );
    Ok(())
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(suffix);
    path.with_file_name(name)
}

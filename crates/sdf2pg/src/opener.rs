//! Connection establishment with bounded password/upgrade retries.
//!
//! Opening an SSCE file can fail in two recoverable ways: the file is
//! encrypted (the operator can supply a password) or it was written by an
//! older engine version (the engine can upgrade it in place, after consent
//! and a mandatory backup). Both are driven from an explicit state loop
//! rather than recursion, so the attempt ceiling and the one-backup
//! invariant are enforced in one place.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::backup::{create_backup, restore_backup};
use crate::engine::{DriverErrorKind, SdfConnection, SdfDriver};
use crate::error::{ExportError, Result};

/// Default ceiling on open attempts for one end-to-end sequence.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Supplies a password when the file turns out to be encrypted.
///
/// Returning `None` abandons the open; the file is left untouched.
pub trait PasswordSource {
    fn password(&mut self) -> Option<String>;
}

impl<F> PasswordSource for F
where
    F: FnMut() -> Option<String>,
{
    fn password(&mut self) -> Option<String> {
        self()
    }
}

/// Decides whether the engine may upgrade the file in place.
///
/// The upgrade is destructive (a backup is taken first), so it requires an
/// explicit yes.
pub trait UpgradeConsent {
    fn allow_upgrade(&mut self, path: &Path) -> bool;
}

impl<F> UpgradeConsent for F
where
    F: FnMut(&Path) -> bool,
{
    fn allow_upgrade(&mut self, path: &Path) -> bool {
        self(path)
    }
}

/// An open connection plus the backup taken along the way, if any.
///
/// The connection handle is owned here and only ever borrowed out; dropping
/// this closes the file.
pub struct OpenedSource {
    /// Open, readable connection.
    pub connection: Box<dyn SdfConnection>,

    /// Backup created before an upgrade, left on disk for the operator.
    pub backup_path: Option<PathBuf>,
}

impl fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedSource")
            .field("backup_path", &self.backup_path)
            .finish_non_exhaustive()
    }
}

/// States of the open retry machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenState {
    Attempt,
    NeedPassword,
    NeedUpgrade,
}

/// Opens SSCE files, negotiating passwords and format upgrades.
pub struct ConnectionOpener<'d> {
    driver: &'d dyn SdfDriver,
    max_attempts: u32,
}

impl<'d> ConnectionOpener<'d> {
    /// Create an opener over the given driver.
    pub fn new(driver: &'d dyn SdfDriver) -> Self {
        Self {
            driver,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Open `path`, retrying through password and upgrade rounds.
    ///
    /// `initial_password` seeds the first attempt (from a flag or env var);
    /// `passwords` is consulted when the engine demands one; `consent`
    /// gates the in-place upgrade.
    ///
    /// Invariants upheld here:
    /// - at most one backup is created per call, however many rounds occur;
    /// - the file is mutated only by the upgrade step, and only after the
    ///   backup provably exists;
    /// - a failed upgrade restores the original bytes before returning.
    pub fn open(
        &self,
        path: &Path,
        initial_password: Option<String>,
        passwords: &mut dyn PasswordSource,
        consent: &mut dyn UpgradeConsent,
    ) -> Result<OpenedSource> {
        if !path.exists() {
            return Err(ExportError::SourceMissing {
                path: path.to_path_buf(),
            });
        }

        let mut state = OpenState::Attempt;
        let mut password = initial_password;
        let mut backup: Option<PathBuf> = None;
        let mut upgrade_approved = false;
        let mut attempts: u32 = 0;

        loop {
            match state {
                OpenState::Attempt => {
                    attempts += 1;
                    if attempts > self.max_attempts {
                        return Err(ExportError::RetryLimitExceeded {
                            attempts: self.max_attempts,
                        });
                    }

                    match self.driver.open(path, password.as_deref()) {
                        Ok(connection) => {
                            info!("Opened source database: {}", path.display());
                            return Ok(OpenedSource {
                                connection,
                                backup_path: backup,
                            });
                        }
                        Err(err) => match err.kind {
                            DriverErrorKind::PasswordRequired => {
                                state = OpenState::NeedPassword;
                            }
                            DriverErrorKind::FormatTooOld => {
                                state = OpenState::NeedUpgrade;
                            }
                            DriverErrorKind::FileNotFound => {
                                return Err(ExportError::SourceMissing {
                                    path: path.to_path_buf(),
                                });
                            }
                            DriverErrorKind::FileLocked => {
                                return Err(ExportError::SourceLocked {
                                    path: path.to_path_buf(),
                                });
                            }
                            DriverErrorKind::Other => return Err(err.into()),
                        },
                    }
                }

                OpenState::NeedPassword => match passwords.password() {
                    Some(pw) => {
                        password = Some(pw);
                        state = OpenState::Attempt;
                    }
                    None => {
                        return Err(ExportError::abandoned(
                            "the file is encrypted and no password was supplied",
                        ));
                    }
                },

                OpenState::NeedUpgrade => {
                    if !upgrade_approved {
                        if !consent.allow_upgrade(path) {
                            return Err(ExportError::abandoned(
                                "the file needs a format upgrade and consent was declined",
                            ));
                        }
                        upgrade_approved = true;
                    }

                    // One backup per end-to-end sequence; later rounds reuse it.
                    let backup_path = match backup.clone() {
                        Some(existing) => existing,
                        None => {
                            let created = create_backup(path)?;
                            backup = Some(created.clone());
                            created
                        }
                    };

                    match self.driver.upgrade(path, password.as_deref()) {
                        Ok(()) => {
                            info!("Upgraded {} to the current format", path.display());
                            state = OpenState::Attempt;
                        }
                        Err(err) if err.kind == DriverErrorKind::PasswordRequired => {
                            // Encrypted old file: the upgrade itself wants the
                            // password. Keep the backup for the next round.
                            state = OpenState::NeedPassword;
                        }
                        Err(err) => {
                            warn!("Upgrade failed: {err}; restoring original file");
                            return match restore_backup(&backup_path, path) {
                                Ok(()) => Err(ExportError::UpgradeFailed {
                                    path: path.to_path_buf(),
                                    message: err.to_string(),
                                }),
                                Err(restore_err) => Err(ExportError::RestoreFailed {
                                    backup: backup_path,
                                    message: restore_err.to_string(),
                                }),
                            };
                        }
                    }
                }
            }
        }
    }
}

//! Interactive prompts wired into the open negotiation.

use std::path::Path;

use dialoguer::{Confirm, Password};
use sdf2pg::{PasswordSource, UpgradeConsent};

/// Prompts on the terminal for the database password.
///
/// An empty entry (or a closed terminal) abandons the open.
pub struct PasswordPrompt;

impl PasswordSource for PasswordPrompt {
    fn password(&mut self) -> Option<String> {
        Password::new()
            .with_prompt("Database password (leave empty to abort)")
            .allow_empty_password(true)
            .interact()
            .ok()
            .filter(|pw| !pw.is_empty())
    }
}

/// Asks before the engine rewrites the file to the current format.
pub struct UpgradePrompt {
    /// Skip the prompt and consent (for unattended runs).
    pub assume_yes: bool,
}

impl UpgradeConsent for UpgradePrompt {
    fn allow_upgrade(&mut self, path: &Path) -> bool {
        if self.assume_yes {
            return true;
        }
        Confirm::new()
            .with_prompt(format!(
                "{} was created by an older engine version and must be upgraded \
                 in place (a backup is taken first). Upgrade it?",
                path.display()
            ))
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

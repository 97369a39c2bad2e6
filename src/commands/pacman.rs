//! Package installation arguments (`pacstrap`, `pacman`).

use std::path::PathBuf;

use crate::command::CommandArgs;

// ============================================================================
// Pacstrap
// ============================================================================

/// Type-safe arguments for `pacstrap`.
///
/// Installs packages into a mounted target root using the host's keyring
/// (`-K` initialises a fresh keyring inside the target).
#[derive(Debug, Clone)]
pub struct PacstrapArgs {
    /// Mounted target root (e.g. `/mnt`).
    pub root: PathBuf,
    /// Packages to install.
    pub packages: Vec<String>,
}

impl CommandArgs for PacstrapArgs {
    fn program(&self) -> String {
        "pacstrap".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-K".to_string(), self.root.display().to_string()];
        args.extend(self.packages.iter().cloned());
        args
    }

    /// Writes a whole system into the target.
    fn is_destructive(&self) -> bool {
        true
    }
}

// ============================================================================
// Pacman -S
// ============================================================================

/// Type-safe arguments for `pacman -S --noconfirm`.
///
/// Meant to run inside the target via `arch-chroot`.
#[derive(Debug, Clone)]
pub struct PacmanInstallArgs {
    /// Packages to install.
    pub packages: Vec<String>,
    /// Skip packages that are already up to date.
    pub needed: bool,
}

impl PacmanInstallArgs {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            needed: true,
        }
    }
}

impl CommandArgs for PacmanInstallArgs {
    fn program(&self) -> String {
        "pacman".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-S".to_string(), "--noconfirm".to_string()];
        if self.needed {
            args.push("--needed".to_string());
        }
        args.extend(self.packages.iter().cloned());
        args
    }
}

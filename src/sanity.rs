//! Pre-flight sanity checks for the live environment
//!
//! Verified before any phase runs:
//! - Running with root privileges (EUID 0)
//! - The external programs the phases call are on `PATH`
//! - The package mirrors are reachable (warning only)
//!
//! Dry runs skip the root and binary checks since nothing is executed.

use std::fmt;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::hardware::{NetworkState, detect_internet};
use crate::process_guard::CommandProcessGroup;

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    pub network: NetworkState,
}

impl SanityCheckResult {
    /// Network is advisory; root and binaries are not
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }
}

impl fmt::Display for SanityCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pre-flight check failed")?;
        if !self.is_root {
            writeln!(f, "  - root privileges required (run with sudo or as root)")?;
        }
        if !self.missing_binaries.is_empty() {
            writeln!(f, "  - missing required binaries:")?;
            for binary in &self.missing_binaries {
                writeln!(
                    f,
                    "      {} (install: pacman -S {})",
                    binary,
                    get_package_for_binary(binary)
                )?;
            }
            let mut packages: Vec<&str> = self
                .missing_binaries
                .iter()
                .map(|b| get_package_for_binary(b))
                .collect();
            packages.dedup();
            writeln!(f, "    fix: pacman -S {}", packages.join(" "))?;
        }
        Ok(())
    }
}

/// Programs the live environment must provide
const REQUIRED_BINARIES: &[&str] = &[
    "sgdisk",      // partitioning
    "cryptsetup",  // LUKS
    "mkfs.ext4",   // filesystem creation
    "mount",
    "pacstrap",    // base install
    "genfstab",
    "arch-chroot", // everything inside the target
    "blkid",
];

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .in_new_process_group()
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Run every check. `dry_run` treats root and binaries as satisfied.
pub fn verify_environment(dry_run: bool) -> SanityCheckResult {
    debug!("Running pre-flight sanity checks (dry_run={})", dry_run);

    let missing_binaries = if dry_run {
        Vec::new()
    } else {
        REQUIRED_BINARIES
            .iter()
            .filter(|b| !binary_exists(b))
            .map(|b| b.to_string())
            .collect()
    };

    let network = detect_internet();
    if !network.is_online() {
        warn!("No connectivity to the Arch mirrors; package and clone steps will fail");
    }

    let result = SanityCheckResult {
        missing_binaries,
        is_root: dry_run || is_running_as_root(),
        network,
    };
    if result.is_ok() {
        info!("Pre-flight checks passed");
    }
    result
}

/// Map binary names to their Arch Linux package names
fn get_package_for_binary(binary: &str) -> &'static str {
    match binary {
        "sgdisk" => "gptfdisk",
        "cryptsetup" => "cryptsetup",
        "mkfs.ext4" => "e2fsprogs",
        "mount" | "blkid" => "util-linux",
        "pacstrap" | "genfstab" | "arch-chroot" => "arch-install-scripts",
        _ => "unknown",
    }
}

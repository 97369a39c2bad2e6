//! Type-safe arguments for storage commands: partitioning, LUKS, mkfs,
//! mounting and fstab generation.
//!
//! # Security Model
//!
//! Passphrases are never passed on the command line (visible in `ps aux`).
//! They are written to a `SecretFile` (mode 0600, zeroed and unlinked on
//! drop) and `cryptsetup` reads them through `--key-file`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::command::CommandArgs;
use crate::types::Filesystem;

// ============================================================================
// SecretFile
// ============================================================================

/// RAII keyfile for `cryptsetup --key-file`.
///
/// Created with 0600 permissions in the temp directory (tmpfs on the live
/// ISO). On drop the content is overwritten with zeros before the file is
/// removed, even if the command using it failed.
#[derive(Debug)]
pub struct SecretFile {
    file: NamedTempFile,
    size: usize,
}

impl SecretFile {
    pub fn new(secret: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(".archstrap-keyfile-")
            .tempfile()?;
        // cryptsetup reads the whole file; a trailing newline would become
        // part of the passphrase
        file.write_all(secret.as_bytes())?;
        file.as_file().sync_all()?;

        debug!("SecretFile created: {:?} ({} bytes)", file.path(), secret.len());
        Ok(Self {
            file,
            size: secret.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for SecretFile {
    fn drop(&mut self) {
        match OpenOptions::new().write(true).open(self.file.path()) {
            Ok(mut f) => {
                let _ = f.write_all(&vec![0u8; self.size]);
                let _ = f.sync_all();
                debug!("SecretFile wiped: {:?}", self.file.path());
            }
            Err(e) => warn!("Failed to wipe keyfile {:?}: {}", self.file.path(), e),
        }
        // NamedTempFile unlinks the path when it drops after this
    }
}

// ============================================================================
// sgdisk
// ============================================================================

/// `sgdisk --zap-all <disk>`: destroys GPT and MBR data structures.
#[derive(Debug, Clone)]
pub struct ZapDiskArgs {
    pub disk: PathBuf,
}

impl CommandArgs for ZapDiskArgs {
    fn program(&self) -> String {
        "sgdisk".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--zap-all".to_string(), self.disk.display().to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `sgdisk --new=N:0:<end> --typecode=N:<code> [--change-name=N:<name>] <disk>`
///
/// | Field       | Flag            | Notes |
/// |-------------|-----------------|-------|
/// | `number`    | `--new=N:...`   | 1-based partition number |
/// | `size`      | end of `--new`  | `+512M` style; `None` takes the remaining space |
/// | `type_code` | `--typecode`    | GPT type (`ef00`, `8300`, `8200`, `ef02`) |
/// | `name`      | `--change-name` | GPT partition name |
#[derive(Debug, Clone)]
pub struct NewPartitionArgs {
    pub disk: PathBuf,
    pub number: u32,
    pub size: Option<String>,
    pub type_code: String,
    pub name: Option<String>,
}

impl CommandArgs for NewPartitionArgs {
    fn program(&self) -> String {
        "sgdisk".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let end = match self.size {
            Some(ref size) if size.starts_with('+') => size.clone(),
            Some(ref size) => format!("+{}", size),
            None => "0".to_string(),
        };
        let mut args = vec![
            format!("--new={}:0:{}", self.number, end),
            format!("--typecode={}:{}", self.number, self.type_code),
        ];
        if let Some(ref name) = self.name {
            args.push(format!("--change-name={}:{}", self.number, name));
        }
        args.push(self.disk.display().to_string());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

// ============================================================================
// cryptsetup
// ============================================================================

/// `cryptsetup --batch-mode luksFormat --type luks2 --key-file <kf> <device>`
#[derive(Debug, Clone)]
pub struct LuksFormatArgs {
    pub device: PathBuf,
    /// Path of a `SecretFile`
    pub key_file: PathBuf,
    pub label: Option<String>,
}

impl CommandArgs for LuksFormatArgs {
    fn program(&self) -> String {
        "cryptsetup".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--batch-mode".to_string(),
            "luksFormat".to_string(),
            "--type".to_string(),
            "luks2".to_string(),
            "--key-file".to_string(),
            self.key_file.display().to_string(),
        ];
        if let Some(ref label) = self.label {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        args.push(self.device.display().to_string());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `cryptsetup open --key-file <kf> <device> <mapper_name>`
#[derive(Debug, Clone)]
pub struct LuksOpenArgs {
    pub device: PathBuf,
    pub mapper_name: String,
    pub key_file: PathBuf,
}

impl CommandArgs for LuksOpenArgs {
    fn program(&self) -> String {
        "cryptsetup".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "open".to_string(),
            "--key-file".to_string(),
            self.key_file.display().to_string(),
            self.device.display().to_string(),
            self.mapper_name.clone(),
        ]
    }
}

// ============================================================================
// mkfs / mkswap
// ============================================================================

/// Filesystem creation. The program is chosen from `filesystem`.
#[derive(Debug, Clone)]
pub struct MkfsArgs {
    pub device: PathBuf,
    pub filesystem: Filesystem,
    pub label: Option<String>,
}

impl CommandArgs for MkfsArgs {
    fn program(&self) -> String {
        match self.filesystem {
            Filesystem::Ext4 => "mkfs.ext4",
            Filesystem::Xfs => "mkfs.xfs",
            Filesystem::Btrfs => "mkfs.btrfs",
            Filesystem::F2fs => "mkfs.f2fs",
            Filesystem::Fat32 => "mkfs.fat",
            Filesystem::Swap => "mkswap",
        }
        .to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = match self.filesystem {
            Filesystem::Ext4 => vec!["-F".to_string()],
            Filesystem::Xfs | Filesystem::Btrfs | Filesystem::F2fs => vec!["-f".to_string()],
            Filesystem::Fat32 => vec!["-F".to_string(), "32".to_string()],
            Filesystem::Swap => vec![],
        };
        if let Some(ref label) = self.label {
            // mkfs.fat labels are upper-case, f2fs uses -l, everything else -L
            match self.filesystem {
                Filesystem::Fat32 => {
                    args.push("-n".to_string());
                    args.push(label.to_uppercase());
                }
                Filesystem::F2fs => {
                    args.push("-l".to_string());
                    args.push(label.clone());
                }
                _ => {
                    args.push("-L".to_string());
                    args.push(label.clone());
                }
            }
        }
        args.push(self.device.display().to_string());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

// ============================================================================
// mount / swapon
// ============================================================================

/// `mount --mkdir [-o opts] <device> <target>`
#[derive(Debug, Clone)]
pub struct MountArgs {
    pub device: PathBuf,
    pub target: PathBuf,
    pub options: Option<String>,
}

impl CommandArgs for MountArgs {
    fn program(&self) -> String {
        "mount".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["--mkdir".to_string()];
        if let Some(ref opts) = self.options {
            args.push("-o".to_string());
            args.push(opts.clone());
        }
        args.push(self.device.display().to_string());
        args.push(self.target.display().to_string());
        args
    }
}

/// `swapon <device>`
#[derive(Debug, Clone)]
pub struct SwaponArgs {
    pub device: PathBuf,
}

impl CommandArgs for SwaponArgs {
    fn program(&self) -> String {
        "swapon".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.device.display().to_string()]
    }
}

// ============================================================================
// blkid / genfstab
// ============================================================================

/// `blkid -s UUID -o value <device>`: prints only the UUID.
#[derive(Debug, Clone)]
pub struct BlkidUuidArgs {
    pub device: PathBuf,
}

impl CommandArgs for BlkidUuidArgs {
    fn program(&self) -> String {
        "blkid".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            "UUID".to_string(),
            "-o".to_string(),
            "value".to_string(),
            self.device.display().to_string(),
        ]
    }
}

/// `genfstab -U <root>`: prints an fstab keyed by UUID.
#[derive(Debug, Clone)]
pub struct GenfstabArgs {
    pub root: PathBuf,
}

impl CommandArgs for GenfstabArgs {
    fn program(&self) -> String {
        "genfstab".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-U".to_string(), self.root.display().to_string()]
    }
}

//! Storage plan engine
//!
//! Translates a `DiskLayout` plus optional `EncryptionConfig` into an ordered
//! list of atomic `StorageOp`s. Pure logic: no I/O, nothing executed.
//!
//! | Phase          | Operations |
//! |----------------|------------|
//! | prepare        | Wipe → Partition* → (LuksFormat → LuksOpen)* → Format* |
//! | mount          | Mount `/` → Mount deeper mountpoints → SwapOn |
//!
//! The prepare ops run in the destructive `FilesystemPrepared` stage; the
//! mount ops run at the start of the base install.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config_file::{DiskLayout, EncryptionConfig};
use crate::context::target_path;
use crate::error::{ProvisionError, Result};
use crate::types::Filesystem;

// ============================================================================
// Storage Operation Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// `sgdisk --zap-all`
    WipeDisk { disk: PathBuf },

    /// `sgdisk --new`
    CreatePartition {
        disk: PathBuf,
        number: u32,
        size: Option<String>,
        type_code: String,
        name: Option<String>,
    },

    /// LUKS2 format; the passphrase comes from the credentials store
    LuksFormat { device: PathBuf, label: String },

    LuksOpen { device: PathBuf, mapper_name: String },

    /// mkfs / mkswap
    FormatFs {
        device: PathBuf,
        filesystem: Filesystem,
        label: Option<String>,
    },

    /// Mount at a host path under the target root
    Mount {
        device: PathBuf,
        mountpoint: PathBuf,
        options: Option<String>,
    },

    SwapOn { device: PathBuf },
}

impl StorageOp {
    /// Mount-phase operations (everything else prepares the disk)
    pub fn is_mount(&self) -> bool {
        matches!(self, Self::Mount { .. } | Self::SwapOn { .. })
    }

    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::WipeDisk { .. }
                | Self::CreatePartition { .. }
                | Self::LuksFormat { .. }
                | Self::FormatFs { .. }
        )
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WipeDisk { disk } => write!(f, "WipeDisk({})", disk.display()),
            Self::CreatePartition {
                disk,
                number,
                size,
                type_code,
                ..
            } => write!(
                f,
                "CreatePartition({}#{}, size={}, type={})",
                disk.display(),
                number,
                size.as_deref().unwrap_or("rest"),
                type_code
            ),
            Self::LuksFormat { device, label } => {
                write!(f, "LuksFormat({}, label={})", device.display(), label)
            }
            Self::LuksOpen {
                device,
                mapper_name,
            } => write!(f, "LuksOpen({} -> /dev/mapper/{})", device.display(), mapper_name),
            Self::FormatFs {
                device,
                filesystem,
                label,
            } => write!(f, "FormatFs({}, fs={}, label={:?})", device.display(), filesystem, label),
            Self::Mount {
                device,
                mountpoint,
                options,
            } => write!(
                f,
                "Mount({} -> {}, opts={:?})",
                device.display(),
                mountpoint.display(),
                options
            ),
            Self::SwapOn { device } => write!(f, "SwapOn({})", device.display()),
        }
    }
}

/// Root filesystem facts the bootloader and initramfs phases need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDevice {
    /// Raw partition holding `/`
    pub partition: PathBuf,
    /// `/dev/mapper` name when `/` is LUKS-encrypted
    pub mapper_name: Option<String>,
}

/// A complete storage plan: an ordered list of operations.
#[derive(Debug, Clone)]
pub struct StoragePlan {
    pub ops: Vec<StorageOp>,
    pub disk: PathBuf,
    pub encrypted: bool,
    pub root: RootDevice,
}

impl StoragePlan {
    pub fn is_destructive(&self) -> bool {
        self.ops.iter().any(StorageOp::is_destructive)
    }

    pub fn prepare_ops(&self) -> impl Iterator<Item = &StorageOp> {
        self.ops.iter().filter(|op| !op.is_mount())
    }

    pub fn mount_ops(&self) -> impl Iterator<Item = &StorageOp> {
        self.ops.iter().filter(|op| op.is_mount())
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Storage plan for {}", self.disk.display()),
            format!("  Encrypted: {}", self.encrypted),
            format!("  Operations ({}):", self.ops.len()),
        ];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, op));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Plan Calculation
// ============================================================================

/// Build the plan for `layout` mounted under `root`.
///
/// The layout is assumed validated; the checks here only guard against
/// inputs that would make the plan itself inconsistent.
pub fn calculate_storage_plan(
    layout: &DiskLayout,
    encryption: Option<&EncryptionConfig>,
    root: &Path,
) -> Result<StoragePlan> {
    let disk = layout.device.clone();
    if !disk.to_string_lossy().starts_with("/dev/") {
        return Err(ProvisionError::validation(format!(
            "Invalid disk path '{}': must start with /dev/",
            disk.display()
        )));
    }

    let mut ops = Vec::new();
    if layout.wipe {
        ops.push(StorageOp::WipeDisk { disk: disk.clone() });
    }

    for (i, part) in layout.partitions.iter().enumerate() {
        ops.push(StorageOp::CreatePartition {
            disk: disk.clone(),
            number: i as u32 + 1,
            size: part.size.clone(),
            type_code: part.type_code(),
            name: part.label.clone(),
        });
    }

    // (device to mount, in-target mountpoint, filesystem)
    let mut mounts: Vec<(PathBuf, PathBuf, Filesystem)> = Vec::new();
    let mut swaps = Vec::new();
    let mut root_device = None;

    for (i, part) in layout.partitions.iter().enumerate() {
        let Some(filesystem) = part.filesystem else {
            continue;
        };
        let partition = partition_path(&disk, i as u32 + 1);
        let mut device = partition.clone();
        let mut mapper = None;

        if let (Some(enc), Some(mp)) = (encryption, part.mountpoint.as_deref()) {
            if enc.covers(mp) {
                let name = mapper_name(mp);
                ops.push(StorageOp::LuksFormat {
                    device: partition.clone(),
                    label: name.clone(),
                });
                ops.push(StorageOp::LuksOpen {
                    device: partition.clone(),
                    mapper_name: name.clone(),
                });
                device = PathBuf::from("/dev/mapper").join(&name);
                mapper = Some(name);
            }
        }

        ops.push(StorageOp::FormatFs {
            device: device.clone(),
            filesystem,
            label: part.label.clone(),
        });

        match part.mountpoint.as_deref() {
            _ if filesystem.is_swap() => swaps.push(device),
            Some(mp) => {
                if mp == Path::new("/") {
                    root_device = Some(RootDevice {
                        partition: partition.clone(),
                        mapper_name: mapper,
                    });
                }
                mounts.push((device, mp.to_path_buf(), filesystem));
            }
            None => {}
        }
    }

    let root_device = root_device.ok_or_else(|| {
        ProvisionError::validation("Disk layout has no partition mounted at /")
    })?;

    // Parents before children: `/` first, then by depth, then by name
    mounts.sort_by(|(_, a, _), (_, b, _)| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });
    for (device, mountpoint, filesystem) in mounts {
        ops.push(StorageOp::Mount {
            device,
            mountpoint: target_path(root, &mountpoint),
            options: filesystem.mount_options().map(str::to_string),
        });
    }
    for device in swaps {
        ops.push(StorageOp::SwapOn { device });
    }

    Ok(StoragePlan {
        ops,
        disk,
        encrypted: root_device.mapper_name.is_some()
            || encryption.is_some_and(|e| !e.mountpoints.is_empty()),
        root: root_device,
    })
}

// ============================================================================
// Helpers
// ============================================================================

/// Partition device path for `disk` and a 1-based partition number.
///
/// `/dev/sdX` → `/dev/sdX1`; disks whose name ends in a digit
/// (`/dev/nvme0n1`, `/dev/loop0`, `/dev/mmcblk0`) take a `p` separator.
pub fn partition_path(disk: &Path, partition_num: u32) -> PathBuf {
    let disk_str = disk.display().to_string();
    if disk_str.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", disk_str, partition_num))
    } else {
        PathBuf::from(format!("{}{}", disk_str, partition_num))
    }
}

/// `/` → `cryptroot`, `/home` → `crypthome`, `/var/lib` → `cryptvar-lib`
pub fn mapper_name(mountpoint: &Path) -> String {
    let rel = mountpoint
        .to_string_lossy()
        .trim_matches('/')
        .replace('/', "-");
    if rel.is_empty() {
        "cryptroot".to_string()
    } else {
        format!("crypt{}", rel)
    }
}

// ============================================================================
// Tests
// ============================================================================

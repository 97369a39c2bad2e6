//! Type-safe configuration enums
//!
//! Stringly-typed choices from the configuration payload are parsed into
//! these enums once, so every later `match` is exhaustive. Each enum has
//! the same spelling in JSON (serde) and on the command line (strum).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Filesystem for a partition in the disk layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    #[default]
    Ext4,
    Xfs,
    Btrfs,
    F2fs,
    /// FAT32, used for the EFI system partition
    Fat32,
    /// Swap space (`mkswap` + `swapon`, never mounted)
    Swap,
}

impl Filesystem {
    pub fn is_swap(self) -> bool {
        matches!(self, Self::Swap)
    }

    /// Default mount options for the root of this filesystem
    pub fn mount_options(self) -> Option<&'static str> {
        match self {
            Self::Btrfs => Some("compress=zstd,noatime"),
            Self::F2fs => Some("compress_algorithm=zstd,noatime"),
            _ => None,
        }
    }

    /// GPT partition type code for `sgdisk --typecode`
    pub fn default_type_code(self) -> &'static str {
        match self {
            Self::Swap => "8200",
            _ => "8300",
        }
    }
}

/// Linux kernel package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Kernel {
    #[default]
    #[serde(rename = "linux")]
    #[strum(serialize = "linux")]
    Linux,
    #[serde(rename = "linux-lts")]
    #[strum(serialize = "linux-lts")]
    LinuxLts,
    #[serde(rename = "linux-zen")]
    #[strum(serialize = "linux-zen")]
    LinuxZen,
    #[serde(rename = "linux-hardened")]
    #[strum(serialize = "linux-hardened")]
    LinuxHardened,
}

impl Kernel {
    /// The kernel package plus its headers package (needed by DKMS drivers)
    pub fn headers_package(self) -> String {
        format!("{}-headers", self)
    }
}

/// GPU driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GpuDriver {
    /// Leave graphics to the kernel's in-tree drivers
    #[default]
    None,
    /// Proprietary NVIDIA driver (needs early KMS and DRM modeset)
    Nvidia,
    Amd,
    Intel,
}

impl GpuDriver {
    /// Packages installed into the target for this driver
    pub fn packages(self, kernels: &[Kernel]) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Nvidia => {
                let mut pkgs = vec![
                    "nvidia-dkms".to_string(),
                    "nvidia-utils".to_string(),
                    "nvidia-settings".to_string(),
                ];
                pkgs.extend(kernels.iter().map(|k| k.headers_package()));
                pkgs
            }
            Self::Amd => vec!["mesa".to_string(), "vulkan-radeon".to_string()],
            Self::Intel => vec!["mesa".to_string(), "vulkan-intel".to_string()],
        }
    }

    /// Whether initramfs/bootloader patching is required
    pub fn needs_kms_patch(self) -> bool {
        matches!(self, Self::Nvidia)
    }
}

/// AUR helper selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AurHelper {
    #[default]
    Paru,
    Yay,
    None,
}

impl AurHelper {
    /// AUR git URL for the helper itself, `None` when no helper is wanted
    pub fn repo_url(self) -> Option<String> {
        match self {
            Self::None => None,
            other => Some(format!("https://aur.archlinux.org/{}.git", other)),
        }
    }
}

/// How networking is configured in the installed system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NetworkMode {
    /// NetworkManager, enabled at boot
    #[default]
    NetworkManager,
    /// iwd for wireless-only machines
    Iwd,
    /// systemd-networkd + systemd-resolved (no extra packages)
    SystemdNetworkd,
    /// Copy the live ISO's iwd/networkd configuration into the target
    CopyIso,
}

impl NetworkMode {
    pub fn packages(self) -> &'static [&'static str] {
        match self {
            Self::NetworkManager => &["networkmanager"],
            Self::Iwd => &["iwd"],
            Self::SystemdNetworkd | Self::CopyIso => &[],
        }
    }

    pub fn services(self) -> &'static [&'static str] {
        match self {
            Self::NetworkManager => &["NetworkManager"],
            Self::Iwd => &["iwd", "systemd-resolved"],
            Self::SystemdNetworkd | Self::CopyIso => &["systemd-networkd", "systemd-resolved"],
        }
    }
}

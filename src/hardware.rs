//! Hardware environment detection
//!
//! Detects firmware mode (UEFI vs BIOS) and network connectivity without
//! shelling out. Firmware mode picks the `grub-install` target and whether
//! the layout needs an EFI system partition; connectivity is a pre-flight
//! check because every package phase downloads.

use std::fmt;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Firmware mode of the machine being provisioned.
///
/// The kernel exposes `/sys/firmware/efi` only when booted in UEFI mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareMode {
    /// UEFI firmware: GPT with an EFI system partition
    Uefi,
    /// Legacy BIOS firmware: grub-install writes to the disk itself
    Bios,
}

impl FirmwareMode {
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }

    pub fn is_bios(self) -> bool {
        matches!(self, Self::Bios)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Online,
    Offline,
}

impl NetworkState {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// Aggregated detection results, gathered once at startup.
#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub firmware: FirmwareMode,
    pub network: NetworkState,
}

impl HardwareInfo {
    /// Detect the live environment. Never fails: an unreachable mirror is
    /// `Offline`, a missing EFI directory is `Bios`.
    pub fn detect() -> Self {
        let firmware = detect_firmware_mode();
        let network = detect_internet();

        info!("Hardware detection: firmware={}, network={}", firmware, network);

        Self { firmware, network }
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Firmware: {}, Network: {}", self.firmware, self.network)
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Detect firmware mode of the running system.
pub fn detect_firmware_mode() -> FirmwareMode {
    detect_firmware_mode_in(Path::new("/sys"))
}

/// Detect firmware mode against an arbitrary sysfs mount.
pub fn detect_firmware_mode_in(sysfs: &Path) -> FirmwareMode {
    let efi_path = sysfs.join("firmware/efi");

    if efi_path.exists() {
        if !efi_path.join("efivars").exists() {
            warn!(
                "{} exists but efivars is missing; grub-install may fail to write boot entries",
                efi_path.display()
            );
        }
        info!("UEFI firmware detected ({} exists)", efi_path.display());
        FirmwareMode::Uefi
    } else {
        info!("BIOS firmware detected ({} not found)", efi_path.display());
        FirmwareMode::Bios
    }
}

/// Connectivity check: TCP connect to archlinux.org:443 with a 5s timeout.
///
/// TCP rather than ICMP because ICMP is commonly filtered and `ping` would
/// mean shelling out.
pub fn detect_internet() -> NetworkState {
    detect_internet_via("archlinux.org:443", Duration::from_secs(5))
}

pub fn detect_internet_via(endpoint: &str, timeout: Duration) -> NetworkState {
    let addrs: Vec<SocketAddr> = match endpoint.to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            warn!("Cannot resolve {}: {}", endpoint, e);
            return NetworkState::Offline;
        }
    };

    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(_stream) => {
                info!("Network connectivity confirmed (TCP to {})", endpoint);
                return NetworkState::Online;
            }
            Err(e) => warn!("Connectivity check to {} failed: {}", addr, e),
        }
    }
    NetworkState::Offline
}

// ============================================================================
// Tests
// ============================================================================

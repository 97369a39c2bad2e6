//! Bootloader and initramfs arguments (`grub-install`, `grub-mkconfig`,
//! theme install routines, `mkinitcpio`).

use std::path::PathBuf;

use crate::command::CommandArgs;
use crate::hardware::FirmwareMode;

/// Where `grub-mkconfig` writes the generated menu inside the target
pub const GRUB_CFG_PATH: &str = "/boot/grub/grub.cfg";

// ============================================================================
// grub-install
// ============================================================================

/// Type-safe arguments for `grub-install`.
///
/// UEFI installs to the EFI system partition mounted at `efi_directory`;
/// BIOS installs to the MBR/BIOS-boot partition of `disk`.
#[derive(Debug, Clone)]
pub struct GrubInstallArgs {
    pub firmware: FirmwareMode,
    /// Whole disk (used for BIOS installs only).
    pub disk: PathBuf,
    /// ESP mount point inside the target (UEFI only).
    pub efi_directory: PathBuf,
    pub bootloader_id: String,
}

impl CommandArgs for GrubInstallArgs {
    fn program(&self) -> String {
        "grub-install".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        match self.firmware {
            FirmwareMode::Uefi => vec![
                "--target=x86_64-efi".to_string(),
                format!("--efi-directory={}", self.efi_directory.display()),
                format!("--bootloader-id={}", self.bootloader_id),
            ],
            FirmwareMode::Bios => vec![
                "--target=i386-pc".to_string(),
                self.disk.display().to_string(),
            ],
        }
    }
}

// ============================================================================
// grub-mkconfig
// ============================================================================

/// Type-safe arguments for `grub-mkconfig -o <output>`.
#[derive(Debug, Clone)]
pub struct GrubMkconfigArgs {
    pub output: PathBuf,
}

impl Default for GrubMkconfigArgs {
    fn default() -> Self {
        Self {
            output: PathBuf::from(GRUB_CFG_PATH),
        }
    }
}

impl CommandArgs for GrubMkconfigArgs {
    fn program(&self) -> String {
        "grub-mkconfig".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-o".to_string(), self.output.display().to_string()]
    }
}

// ============================================================================
// Theme install routine
// ============================================================================

/// Arguments for a GRUB theme repository's own `install.sh`.
///
/// `script` is the path as seen by whoever executes it (inside the target
/// when run via `arch-chroot`).
#[derive(Debug, Clone)]
pub struct ThemeInstallArgs {
    pub script: PathBuf,
    pub theme: String,
    /// Install into the boot partition (`/boot/grub/themes`).
    pub boot: bool,
}

impl CommandArgs for ThemeInstallArgs {
    fn program(&self) -> String {
        self.script.display().to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["--theme".to_string(), self.theme.clone()];
        if self.boot {
            args.push("--boot".to_string());
        }
        args
    }
}

// ============================================================================
// mkinitcpio
// ============================================================================

/// Type-safe arguments for `mkinitcpio`.
#[derive(Debug, Clone)]
pub struct MkinitcpioArgs {
    /// Rebuild every preset (`-P`) rather than a single one.
    pub all_presets: bool,
    /// Preset name when `all_presets` is false (e.g. `linux`).
    pub preset: Option<String>,
}

impl Default for MkinitcpioArgs {
    fn default() -> Self {
        Self {
            all_presets: true,
            preset: None,
        }
    }
}

impl CommandArgs for MkinitcpioArgs {
    fn program(&self) -> String {
        "mkinitcpio".to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        if self.all_presets {
            return vec!["-P".to_string()];
        }
        match self.preset {
            Some(ref preset) => vec!["-p".to_string(), preset.clone()],
            None => vec!["-P".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grub_install_uefi() {
        let args = GrubInstallArgs {
            firmware: FirmwareMode::Uefi,
            disk: PathBuf::from("/dev/sda"),
            efi_directory: PathBuf::from("/boot"),
            bootloader_id: "GRUB".into(),
        };
        assert_eq!(
            args.to_cli_args(),
            vec!["--target=x86_64-efi", "--efi-directory=/boot", "--bootloader-id=GRUB"]
        );
    }

    #[test]
    fn test_grub_install_bios_targets_disk() {
        let args = GrubInstallArgs {
            firmware: FirmwareMode::Bios,
            disk: PathBuf::from("/dev/vda"),
            efi_directory: PathBuf::from("/boot"),
            bootloader_id: "GRUB".into(),
        };
        assert_eq!(args.to_cli_args(), vec!["--target=i386-pc", "/dev/vda"]);
    }

    #[test]
    fn test_theme_install_args() {
        let args = ThemeInstallArgs {
            script: PathBuf::from("/tmp/grub2-themes/install.sh"),
            theme: "tela".into(),
            boot: true,
        };
        assert_eq!(args.program(), "/tmp/grub2-themes/install.sh");
        assert_eq!(args.to_cli_args(), vec!["--theme", "tela", "--boot"]);
    }

    #[test]
    fn test_mkinitcpio_defaults_to_all_presets() {
        assert_eq!(MkinitcpioArgs::default().to_cli_args(), vec!["-P"]);
        let single = MkinitcpioArgs {
            all_presets: false,
            preset: Some("linux-lts".into()),
        };
        assert_eq!(single.to_cli_args(), vec!["-p", "linux-lts"]);
    }
}

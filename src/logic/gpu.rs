//! GPU driver installation and NVIDIA kernel mode setting.
//!
//! The proprietary NVIDIA driver needs its modules in the initramfs and
//! `nvidia_drm.modeset=1` on the kernel command line, otherwise Wayland
//! compositors fall back to software rendering. Both files are patched only
//! when the setting is missing; the initramfs and then the GRUB menu are
//! regenerated afterwards.

use std::path::Path;

use tracing::info;

use crate::command::{CommandArgs, CommandRunner};
use crate::commands::boot::{GrubMkconfigArgs, MkinitcpioArgs};
use crate::commands::pacman::PacmanInstallArgs;
use crate::context::target_path;
use crate::error::Result;
use crate::logic::bootloader::GRUB_DEFAULTS;
use crate::patch::{ConfigFilePatcher, PatchOutcome};
use crate::types::{GpuDriver, Kernel};

pub const MKINITCPIO_CONF: &str = "/etc/mkinitcpio.conf";

/// Early-KMS modules, in load order
pub const NVIDIA_MODULES: [&str; 4] = ["nvidia", "nvidia_modeset", "nvidia_uvm", "nvidia_drm"];

pub const NVIDIA_KMS_PARAM: &str = "nvidia_drm.modeset=1";

/// What the KMS patch changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuPatchReport {
    pub modules: PatchOutcome,
    pub cmdline: PatchOutcome,
}

pub struct GpuDriverConfigurer<'a> {
    runner: &'a dyn CommandRunner,
    patcher: ConfigFilePatcher,
}

impl<'a> GpuDriverConfigurer<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            patcher: ConfigFilePatcher::with_dry_run(runner.is_dry_run()),
        }
    }

    /// Install `driver`'s packages into the target and, for NVIDIA, apply
    /// the KMS patch. `None` when no patch was needed.
    pub fn configure(
        &self,
        root: &Path,
        driver: GpuDriver,
        kernels: &[Kernel],
    ) -> Result<Option<GpuPatchReport>> {
        let packages = driver.packages(kernels);
        if !packages.is_empty() {
            info!("Installing {} driver packages", driver);
            self.runner
                .run(&PacmanInstallArgs::new(packages).to_spec().in_chroot(root))?;
        }
        if !driver.needs_kms_patch() {
            return Ok(None);
        }
        self.enable_kms(root).map(Some)
    }

    /// Patch `mkinitcpio.conf` and the GRUB defaults under `root`, then
    /// rebuild the initramfs and the menu. Either rebuild failing fails the
    /// whole operation.
    pub fn enable_kms(&self, root: &Path) -> Result<GpuPatchReport> {
        let modules = self.patcher.add_list_items(
            &target_path(root, Path::new(MKINITCPIO_CONF)),
            "MODULES",
            &NVIDIA_MODULES,
            None,
        )?;
        let cmdline = self.patcher.insert_token_into_value(
            &target_path(root, Path::new(GRUB_DEFAULTS)),
            "GRUB_CMDLINE_LINUX_DEFAULT",
            NVIDIA_KMS_PARAM,
        )?;

        self.runner
            .run(&MkinitcpioArgs::default().to_spec().in_chroot(root))?;
        self.runner
            .run(&GrubMkconfigArgs::default().to_spec().in_chroot(root))?;

        Ok(GpuPatchReport { modules, cmdline })
    }
}

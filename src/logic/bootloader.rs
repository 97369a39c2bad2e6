//! GRUB installation and theming.
//!
//! Two entry points matching two pipeline steps:
//!
//! - `install_bootloader`: packages, `grub-install`, kernel parameters for an
//!   encrypted root, menu generation.
//! - `install_theme`: clone a theme repository, run its install routine,
//!   point `GRUB_THEME` at the installed descriptor, regenerate the menu.
//!
//! A theme that cannot be found after installation is logged and the menu is
//! still regenerated; it never fails the step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::command::{CommandArgs, CommandRunner};
use crate::commands::boot::{GrubInstallArgs, GrubMkconfigArgs, ThemeInstallArgs};
use crate::commands::disk::BlkidUuidArgs;
use crate::commands::git::GitCloneArgs;
use crate::commands::pacman::PacmanInstallArgs;
use crate::config_file::ThemeConfig;
use crate::context::{ProvisioningContext, target_path};
use crate::engine::storage::RootDevice;
use crate::error::{ProvisionError, Result};
use crate::logic::theme::{ThemeDescriptor, ThemeResolver};
use crate::patch::ConfigFilePatcher;
use crate::profiles::BOOTLOADER_PACKAGES;

/// GRUB defaults file inside the target
pub const GRUB_DEFAULTS: &str = "/etc/default/grub";

/// Directory inside the target that theme repositories are cloned into
const SCRATCH_DIR: &str = "/tmp";

const BOOTLOADER_ID: &str = "GRUB";

pub struct BootloaderThemeInstaller<'a> {
    runner: &'a dyn CommandRunner,
    patcher: ConfigFilePatcher,
}

impl<'a> BootloaderThemeInstaller<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            patcher: ConfigFilePatcher::with_dry_run(runner.is_dry_run()),
        }
    }

    fn run_in(&self, root: &Path, args: &dyn CommandArgs) -> Result<()> {
        self.runner.run(&args.to_spec().in_chroot(root)).map(|_| ())
    }

    /// `grub efibootmgr os-prober git` inside the target
    pub fn install_packages(&self, root: &Path) -> Result<()> {
        self.run_in(root, &PacmanInstallArgs::new(BOOTLOADER_PACKAGES.iter().copied()))
    }

    pub fn regenerate(&self, root: &Path) -> Result<()> {
        self.run_in(root, &GrubMkconfigArgs::default())
    }

    /// Install GRUB for the context's firmware. An encrypted root gets its
    /// `cryptdevice=` and `root=` parameters before the menu is generated.
    pub fn install_bootloader(&self, ctx: &ProvisioningContext, root_device: &RootDevice) -> Result<()> {
        let root = ctx.root();
        self.install_packages(root)?;

        let layout = &ctx.config().disk_layout;
        let efi_directory = layout
            .esp()
            .and_then(|esp| esp.mountpoint.clone())
            .unwrap_or_else(|| PathBuf::from("/boot"));
        self.run_in(
            root,
            &GrubInstallArgs {
                firmware: ctx.firmware(),
                disk: layout.device.clone(),
                efi_directory,
                bootloader_id: BOOTLOADER_ID.to_string(),
            },
        )?;

        if let Some(ref mapper) = root_device.mapper_name {
            let uuid = self.partition_uuid(&root_device.partition)?;
            let defaults = target_path(root, Path::new(GRUB_DEFAULTS));
            // Inserted front-first, so the final order is cryptdevice then root
            self.patcher.insert_token_into_value(
                &defaults,
                "GRUB_CMDLINE_LINUX",
                &format!("root=/dev/mapper/{}", mapper),
            )?;
            self.patcher.insert_token_into_value(
                &defaults,
                "GRUB_CMDLINE_LINUX",
                &format!("cryptdevice=UUID={}:{}", uuid, mapper),
            )?;
        }

        self.regenerate(root)
    }

    fn partition_uuid(&self, partition: &Path) -> Result<String> {
        let output = self.runner.run(
            &BlkidUuidArgs {
                device: partition.to_path_buf(),
            }
            .to_spec()
            .capture_stdout(),
        )?;
        let uuid = output.stdout.trim().to_string();
        if !uuid.is_empty() {
            return Ok(uuid);
        }
        if self.runner.is_dry_run() {
            return Ok("DRY-RUN-UUID".to_string());
        }
        Err(ProvisionError::validation(format!(
            "blkid reported no UUID for {}",
            partition.display()
        )))
    }

    /// Clone and install the configured theme into the target at `root`.
    ///
    /// Returns the descriptor `GRUB_THEME` now points at, or `None` when the
    /// install routine left no descriptor behind.
    pub fn install_theme(&self, root: &Path, theme: &ThemeConfig) -> Result<Option<ThemeDescriptor>> {
        let theme_dir = target_path(root, &theme.theme_dir);
        if self.runner.is_dry_run() {
            info!("[dry-run] would create {}", theme_dir.display());
        } else {
            fs::create_dir_all(&theme_dir).map_err(|e| ProvisionError::from_io(&theme_dir, e))?;
        }

        let checkout = Path::new(SCRATCH_DIR).join(repo_dir_name(&theme.repo_url));
        self.clear_stale_checkout(&target_path(root, &checkout))?;

        let mut clone = GitCloneArgs::new(&theme.repo_url, &checkout);
        clone.depth = Some(1);
        self.run_in(root, &clone)?;

        self.run_in(
            root,
            &ThemeInstallArgs {
                script: checkout.join("install.sh"),
                theme: theme.name.clone(),
                boot: true,
            },
        )?;

        let resolver = ThemeResolver::new(&theme.descriptor);
        let descriptor = resolver.resolve_in_target(root, &theme.theme_dir);
        match descriptor {
            Some(ref found) => {
                self.patcher.set_or_append_key(
                    &target_path(root, Path::new(GRUB_DEFAULTS)),
                    "GRUB_THEME",
                    &found.target_path.display().to_string(),
                )?;
            }
            None => {
                let not_found = ProvisionError::ThemeNotResolved {
                    search_root: theme.theme_dir.clone(),
                    marker: resolver.marker().to_string(),
                };
                warn!("{}; GRUB_THEME left unchanged", not_found);
            }
        }

        self.regenerate(root)?;
        Ok(descriptor)
    }

    fn clear_stale_checkout(&self, host_path: &Path) -> Result<()> {
        if self.runner.is_dry_run() {
            return Ok(());
        }
        match fs::remove_dir_all(host_path) {
            Ok(()) => {
                info!("Removed stale checkout {}", host_path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProvisionError::from_io(host_path, e)),
        }
    }
}

/// `https://github.com/vinceliuice/grub2-themes.git` → `grub2-themes`
fn repo_dir_name(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "theme".to_string()
    } else {
        name.to_string()
    }
}

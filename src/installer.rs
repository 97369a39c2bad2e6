//! Storage and base-system collaborators
//!
//! The pipeline only sees the `DiskPreparer`, `BaseInstaller` and
//! `Confirmation` traits. `CommandInstaller` is the default implementation:
//! it executes a `StoragePlan` with sgdisk/cryptsetup/mkfs and lays down the
//! base system with pacstrap, all through a `CommandRunner`.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::command::{CommandArgs, CommandRunner};
use crate::commands::boot::MkinitcpioArgs;
use crate::commands::disk::{
    GenfstabArgs, LuksFormatArgs, LuksOpenArgs, MkfsArgs, MountArgs, NewPartitionArgs, SecretFile,
    SwaponArgs, ZapDiskArgs,
};
use crate::commands::pacman::PacstrapArgs;
use crate::config_file::ENCRYPTION_PASSWORD;
use crate::context::ProvisioningContext;
use crate::engine::storage::{StorageOp, StoragePlan};
use crate::error::{ProvisionError, Result};
use crate::patch::{ConfigFilePatcher, write_atomic};
use crate::profiles::BASE_PACKAGES;

/// Partitions, encrypts and formats the target disk.
pub trait DiskPreparer {
    /// Run every non-mount operation of `plan`. Destroys data.
    fn prepare(&self, ctx: &ProvisioningContext, plan: &StoragePlan) -> Result<()>;
}

/// Mounts the prepared filesystems and installs the base system into them.
pub trait BaseInstaller {
    fn install_base(&self, ctx: &ProvisioningContext, plan: &StoragePlan) -> Result<()>;
}

/// Operator gate in front of destructive work.
pub trait Confirmation {
    /// `Ok(true)` only on an explicit yes
    fn confirm(&self, summary: &str) -> Result<bool>;
}

/// Prints the plan to stderr and reads a y/N answer from stdin.
#[derive(Debug, Default)]
pub struct StdinConfirmation;

impl Confirmation for StdinConfirmation {
    fn confirm(&self, summary: &str) -> Result<bool> {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{}", summary)?;
        write!(stderr, "ALL DATA ON THE DISK WILL BE LOST. Continue? [y/N] ")?;
        stderr.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(is_yes(&answer))
    }
}

/// Backs `--yes`: every confirmation succeeds.
#[derive(Debug, Default)]
pub struct AssumeYes;

impl Confirmation for AssumeYes {
    fn confirm(&self, summary: &str) -> Result<bool> {
        info!("Confirmation assumed (--yes):\n{}", summary);
        Ok(true)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Command-backed `DiskPreparer` + `BaseInstaller`.
pub struct CommandInstaller<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> CommandInstaller<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn run(&self, args: &dyn CommandArgs) -> Result<()> {
        self.runner.run(&args.to_spec()).map(|_| ())
    }
}

impl DiskPreparer for CommandInstaller<'_> {
    fn prepare(&self, ctx: &ProvisioningContext, plan: &StoragePlan) -> Result<()> {
        info!("Preparing {} ({} operations)", plan.disk.display(), plan.ops.len());

        // One keyfile for every LUKS operation, removed when this returns
        let key_file = if plan.ops.iter().any(|op| matches!(op, StorageOp::LuksFormat { .. })) {
            Some(SecretFile::new(ctx.credentials().get(ENCRYPTION_PASSWORD)?)?)
        } else {
            None
        };
        let key_path = || {
            key_file
                .as_ref()
                .map(|k| k.path().to_path_buf())
                .ok_or_else(|| ProvisionError::MissingCredential(ENCRYPTION_PASSWORD.to_string()))
        };

        for op in plan.prepare_ops() {
            info!("Storage: {}", op);
            match op {
                StorageOp::WipeDisk { disk } => self.run(&ZapDiskArgs { disk: disk.clone() })?,
                StorageOp::CreatePartition {
                    disk,
                    number,
                    size,
                    type_code,
                    name,
                } => self.run(&NewPartitionArgs {
                    disk: disk.clone(),
                    number: *number,
                    size: size.clone(),
                    type_code: type_code.clone(),
                    name: name.clone(),
                })?,
                StorageOp::LuksFormat { device, label } => self.run(&LuksFormatArgs {
                    device: device.clone(),
                    key_file: key_path()?,
                    label: Some(label.clone()),
                })?,
                StorageOp::LuksOpen {
                    device,
                    mapper_name,
                } => self.run(&LuksOpenArgs {
                    device: device.clone(),
                    mapper_name: mapper_name.clone(),
                    key_file: key_path()?,
                })?,
                StorageOp::FormatFs {
                    device,
                    filesystem,
                    label,
                } => self.run(&MkfsArgs {
                    device: device.clone(),
                    filesystem: *filesystem,
                    label: label.clone(),
                })?,
                StorageOp::Mount { .. } | StorageOp::SwapOn { .. } => {}
            }
        }
        Ok(())
    }
}

impl BaseInstaller for CommandInstaller<'_> {
    fn install_base(&self, ctx: &ProvisioningContext, plan: &StoragePlan) -> Result<()> {
        for op in plan.mount_ops() {
            info!("Storage: {}", op);
            match op {
                StorageOp::Mount {
                    device,
                    mountpoint,
                    options,
                } => self.run(&MountArgs {
                    device: device.clone(),
                    target: mountpoint.clone(),
                    options: options.clone(),
                })?,
                StorageOp::SwapOn { device } => self.run(&SwaponArgs {
                    device: device.clone(),
                })?,
                _ => {}
            }
        }

        let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
        packages.extend(ctx.config().kernels.iter().map(|k| k.to_string()));
        self.run(&PacstrapArgs {
            root: ctx.root().to_path_buf(),
            packages,
        })?;

        let fstab = self.runner.run(
            &GenfstabArgs {
                root: ctx.root().to_path_buf(),
            }
            .to_spec()
            .capture_stdout(),
        )?;
        append_fstab(&ctx.target_path("/etc/fstab"), &fstab.stdout, self.runner.is_dry_run())?;

        if plan.root.mapper_name.is_some() {
            // The encrypt hook must unlock the root before filesystems mount it
            ConfigFilePatcher::with_dry_run(self.runner.is_dry_run()).add_list_items(
                &ctx.target_path("/etc/mkinitcpio.conf"),
                "HOOKS",
                &["encrypt"],
                Some("filesystems"),
            )?;
            self.runner
                .run(&MkinitcpioArgs::default().to_spec().in_chroot(ctx.root()))?;
        }
        Ok(())
    }
}

fn append_fstab(path: &Path, entries: &str, dry_run: bool) -> Result<()> {
    if dry_run {
        info!("[dry-run] would append generated entries to {}", path.display());
        return Ok(());
    }
    if entries.trim().is_empty() {
        warn!("genfstab produced no entries");
        return Ok(());
    }
    let mut contents = match fs::read_to_string(path) {
        Ok(existing) => existing,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ProvisionError::from_io(path, e)),
    };
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(entries);
    write_atomic(path, &contents, Some(0o644))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;
    use crate::config_file::{Credentials, ProvisioningConfig, ROOT_PASSWORD, USER_PASSWORD};
    use crate::engine::storage::calculate_storage_plan;
    use crate::hardware::FirmwareMode;

    fn context(encrypted: bool, root: &Path) -> ProvisioningContext {
        let mut config: ProvisioningConfig = serde_json::from_str(
            r#"{
                "hostname": "archbox",
                "kernels": ["linux", "linux-lts"],
                "disk_layout": {
                    "device": "/dev/vda",
                    "partitions": [
                        { "size": "512M", "filesystem": "fat32", "mountpoint": "/boot" },
                        { "filesystem": "ext4", "mountpoint": "/" }
                    ]
                },
                "user": { "username": "geoff" }
            }"#,
        )
        .unwrap();
        config.mountpoint = root.to_path_buf();
        let mut creds = Credentials::default();
        creds.insert(ROOT_PASSWORD, "r");
        creds.insert(USER_PASSWORD, "u");
        if encrypted {
            config.encryption = Some(Default::default());
            creds.insert(ENCRYPTION_PASSWORD, "luks-secret");
        }
        ProvisioningContext::new(config, creds, FirmwareMode::Uefi).unwrap()
    }

    fn plan(ctx: &ProvisioningContext) -> StoragePlan {
        calculate_storage_plan(
            &ctx.config().disk_layout,
            ctx.config().encryption.as_ref(),
            ctx.root(),
        )
        .unwrap()
    }

    #[test]
    fn test_yes_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }

    #[test]
    fn test_prepare_runs_destructive_ops_only() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(false, dir.path());
        let runner = ScriptedRunner::new();
        CommandInstaller::new(&runner).prepare(&ctx, &plan(&ctx)).unwrap();

        assert_eq!(
            runner.programs(),
            vec!["sgdisk", "sgdisk", "sgdisk", "mkfs.fat", "mkfs.ext4"]
        );
    }

    #[test]
    fn test_luks_passphrase_never_on_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(true, dir.path());
        let runner = ScriptedRunner::new();
        CommandInstaller::new(&runner).prepare(&ctx, &plan(&ctx)).unwrap();

        let luks: Vec<_> = runner
            .recorded()
            .into_iter()
            .filter(|s| s.program() == "cryptsetup")
            .collect();
        assert_eq!(luks.len(), 2);
        for spec in &luks {
            assert!(!spec.mentions("luks-secret"));
            assert!(spec.mentions("--key-file"));
        }
        assert!(runner
            .recorded()
            .iter()
            .any(|s| s.program() == "mkfs.ext4" && s.mentions("/dev/mapper/cryptroot")));
    }

    #[test]
    fn test_install_base_mounts_then_pacstraps_and_appends_fstab() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/fstab"), "# static info\n").unwrap();
        let ctx = context(false, dir.path());
        let runner = ScriptedRunner::new();
        CommandInstaller::new(&runner)
            .install_base(&ctx, &plan(&ctx))
            .unwrap();

        assert_eq!(runner.programs(), vec!["mount", "mount", "pacstrap", "genfstab"]);
        let pacstrap = &runner.recorded()[2];
        assert!(pacstrap.mentions("linux-lts"));
        assert!(pacstrap.mentions("linux-firmware"));
        // The scripted runner yields no genfstab output, so fstab is untouched
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/fstab")).unwrap(),
            "# static info\n"
        );
    }

    #[test]
    fn test_encrypted_root_adds_encrypt_hook() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(
            dir.path().join("etc/mkinitcpio.conf"),
            "MODULES=()\nHOOKS=(base udev autodetect block filesystems fsck)\n",
        )
        .unwrap();
        let ctx = context(true, dir.path());
        let runner = ScriptedRunner::new();
        CommandInstaller::new(&runner)
            .install_base(&ctx, &plan(&ctx))
            .unwrap();

        let conf = fs::read_to_string(dir.path().join("etc/mkinitcpio.conf")).unwrap();
        assert!(conf.contains("HOOKS=(base udev autodetect block encrypt filesystems fsck)"));
        assert_eq!(runner.programs().last().map(String::as_str), Some("mkinitcpio"));
    }

    #[test]
    fn test_append_fstab_adds_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        fs::write(&path, "# header").unwrap();
        append_fstab(&path, "UUID=abc / ext4 rw 0 1\n", false).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "# header\nUUID=abc / ext4 rw 0 1\n"
        );
    }

    #[test]
    fn test_append_fstab_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstab");
        append_fstab(&path, "UUID=abc / ext4 rw 0 1\n", true).unwrap();
        assert!(!path.exists());
    }
}

//! Shared fixtures for the integration tests.
//!
//! A throwaway target root with the config files a pacstrapped system has,
//! plus fakes for every collaborator the pipeline talks to.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use archstrap::command::{CommandOutput, CommandRunner, CommandSpec};
use archstrap::config_file::{
    Credentials, ENCRYPTION_PASSWORD, ProvisioningConfig, ROOT_PASSWORD, USER_PASSWORD,
};
use archstrap::context::ProvisioningContext;
use archstrap::engine::storage::StoragePlan;
use archstrap::error::{ProvisionError, Result};
use archstrap::hardware::FirmwareMode;
use archstrap::installer::{BaseInstaller, Confirmation, DiskPreparer};
use tempfile::TempDir;

pub const USERNAME: &str = "geoff";

pub const MKINITCPIO: &str = "\
# vim:set ft=sh
MODULES=()
BINARIES=()
FILES=()
HOOKS=(base udev autodetect microcode modconf kms keyboard block filesystems fsck)
";

pub const GRUB_DEFAULTS: &str = "\
GRUB_DEFAULT=0
GRUB_TIMEOUT=5
GRUB_CMDLINE_LINUX_DEFAULT=\"loglevel=3 quiet\"
GRUB_CMDLINE_LINUX=\"\"
#GRUB_THEME=\"/path/to/gfxtheme\"
";

/// In-target path of the descriptor the default theme installs
pub const THEME_DESCRIPTOR: &str = "/boot/grub/themes/tela/theme.txt";

// ============================================================================
// Target root
// ============================================================================

/// A directory standing in for the mounted target
pub struct Target {
    dir: TempDir,
}

impl Target {
    /// Fresh base system: GRUB defaults, mkinitcpio.conf, sudoers.d and a
    /// home directory with a dotfiles checkout already in place.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("etc/default")).unwrap();
        fs::create_dir_all(root.join("etc/sudoers.d")).unwrap();
        fs::write(root.join("etc/default/grub"), GRUB_DEFAULTS).unwrap();
        fs::write(root.join("etc/mkinitcpio.conf"), MKINITCPIO).unwrap();
        for package in ["zsh", "nvim", "fonts", ".git"] {
            fs::create_dir_all(root.join("home").join(USERNAME).join("dotfiles").join(package))
                .unwrap();
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Host path of an absolute in-target path
    pub fn path(&self, in_target: &str) -> PathBuf {
        self.root().join(in_target.trim_start_matches('/'))
    }

    pub fn read(&self, in_target: &str) -> String {
        fs::read_to_string(self.path(in_target)).unwrap()
    }

    /// Leave a theme descriptor behind, as the theme's install script would
    pub fn with_installed_theme(self) -> Self {
        let descriptor = self.path(THEME_DESCRIPTOR);
        fs::create_dir_all(descriptor.parent().unwrap()).unwrap();
        fs::write(descriptor, "title-text: \"\"\n").unwrap();
        self
    }

    /// Configuration for a UEFI machine with its mountpoint at this root
    pub fn config(&self) -> ProvisioningConfig {
        self.config_with(|_| {})
    }

    pub fn config_with(&self, tweak: impl FnOnce(&mut serde_json::Value)) -> ProvisioningConfig {
        let mut json = serde_json::json!({
            "mountpoint": self.root(),
            "hostname": "archbox",
            "firmware": "uefi",
            "disk_layout": {
                "device": "/dev/nvme0n1",
                "partitions": [
                    { "size": "1G", "filesystem": "fat32", "mountpoint": "/boot" },
                    { "size": "4G", "filesystem": "swap" },
                    { "filesystem": "ext4", "mountpoint": "/" }
                ]
            },
            "user": { "username": USERNAME, "groups": ["wheel", "video"] }
        });
        tweak(&mut json);
        serde_json::from_value(json).unwrap()
    }
}

pub fn credentials() -> Credentials {
    let mut creds = Credentials::default();
    creds.insert(ROOT_PASSWORD, "r00t");
    creds.insert(USER_PASSWORD, "hunter2");
    creds.insert(ENCRYPTION_PASSWORD, "correct horse");
    creds
}

pub fn context(config: ProvisioningConfig) -> ProvisioningContext {
    ProvisioningContext::new(config, credentials(), FirmwareMode::Uefi).unwrap()
}

// ============================================================================
// Fakes
// ============================================================================

/// Records every command; fails any whose argv mentions a configured needle.
#[derive(Default)]
pub struct FakeRunner {
    recorded: RefCell<Vec<CommandSpec>>,
    failures: Vec<String>,
    blkid_uuid: String,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            blkid_uuid: "0a1b2c3d-4e5f-6789-abcd-ef0123456789".to_string(),
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failures.push(needle.to_string());
        self
    }

    pub fn recorded(&self) -> Vec<CommandSpec> {
        self.recorded.borrow().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.recorded.borrow().iter().any(|s| s.mentions(needle))
    }

    /// True if `program` itself was executed, not merely named in an argument
    pub fn ran_program(&self, program: &str) -> bool {
        self.recorded.borrow().iter().any(|s| s.program() == program)
    }

    /// Every recorded command whose program is `program`
    pub fn runs_of(&self, program: &str) -> Vec<CommandSpec> {
        self.recorded
            .borrow()
            .iter()
            .filter(|s| s.program() == program)
            .cloned()
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.recorded.borrow_mut().push(spec.clone());
        if self.failures.iter().any(|n| spec.mentions(n)) {
            return Err(ProvisionError::command_failed(
                spec.display(),
                Some(1),
                "simulated failure",
            ));
        }
        let stdout = if spec.program() == "blkid" {
            format!("{}\n", self.blkid_uuid)
        } else {
            String::new()
        };
        Ok(CommandOutput {
            stdout,
            exit_code: Some(0),
            ..CommandOutput::default()
        })
    }
}

/// Disk preparer and base installer that only count their calls
#[derive(Default)]
pub struct FakeInstaller {
    pub prepared: Cell<usize>,
    pub based: Cell<usize>,
    pub fail_base: bool,
}

impl FakeInstaller {
    pub fn failing_base() -> Self {
        Self {
            fail_base: true,
            ..Self::default()
        }
    }
}

impl DiskPreparer for FakeInstaller {
    fn prepare(&self, _ctx: &ProvisioningContext, _plan: &StoragePlan) -> Result<()> {
        self.prepared.set(self.prepared.get() + 1);
        Ok(())
    }
}

impl BaseInstaller for FakeInstaller {
    fn install_base(&self, _ctx: &ProvisioningContext, _plan: &StoragePlan) -> Result<()> {
        self.based.set(self.based.get() + 1);
        if self.fail_base {
            return Err(ProvisionError::command_failed(
                "pacstrap -K /mnt base linux linux-firmware",
                Some(1),
                "error: failed to synchronize all databases",
            ));
        }
        Ok(())
    }
}

/// Answers every prompt the same way and remembers what it was shown
pub struct FakeConfirmation {
    answer: bool,
    pub shown: RefCell<Vec<String>>,
}

impl FakeConfirmation {
    pub fn yes() -> Self {
        Self {
            answer: true,
            shown: RefCell::new(Vec::new()),
        }
    }

    pub fn no() -> Self {
        Self {
            answer: false,
            shown: RefCell::new(Vec::new()),
        }
    }
}

impl Confirmation for FakeConfirmation {
    fn confirm(&self, summary: &str) -> Result<bool> {
        self.shown.borrow_mut().push(summary.to_string());
        Ok(self.answer)
    }
}

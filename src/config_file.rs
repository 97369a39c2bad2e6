//! Configuration and credentials payloads.
//!
//! Both are JSON files read once at startup. The configuration describes
//! the machine to build; the credentials file is a flat `key -> string`
//! object kept separate so the configuration can be shared without leaking
//! passwords.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::hardware::FirmwareMode;
use crate::profiles::Profile;
use crate::types::{AurHelper, Filesystem, GpuDriver, Kernel, NetworkMode};

pub const DEFAULT_MOUNTPOINT: &str = "/mnt";
pub const DEFAULT_THEME_REPO: &str = "https://github.com/vinceliuice/grub2-themes.git";
pub const DEFAULT_THEME_NAME: &str = "tela";
pub const DEFAULT_THEME_DIR: &str = "/boot/grub/themes";
pub const DEFAULT_THEME_DESCRIPTOR: &str = "theme.txt";
pub const DEFAULT_DOTFILES_REPO: &str = "https://github.com/ggroenendale/dotfiles.git";

/// Credential keys looked up in the credentials payload
pub const ROOT_PASSWORD: &str = "root_password";
pub const USER_PASSWORD: &str = "user_password";
pub const ENCRYPTION_PASSWORD: &str = "encryption_password";

// ============================================================================
// Configuration payload
// ============================================================================

/// Everything the run needs to know about the target machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_mountpoint")]
    pub mountpoint: PathBuf,
    pub hostname: String,
    #[serde(default = "default_kernels")]
    pub kernels: Vec<Kernel>,
    /// Overrides firmware detection; detected from sysfs when absent
    #[serde(default)]
    pub firmware: Option<FirmwareMode>,
    pub disk_layout: DiskLayout,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    /// Absent means the network phase is skipped
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub gpu_driver: GpuDriver,
    pub user: UserConfig,
    #[serde(default)]
    pub theme: ThemeConfig,
    /// `null` disables the dotfiles phase
    #[serde(default = "default_dotfiles")]
    pub dotfiles: Option<DotfilesConfig>,
    #[serde(default)]
    pub aur_helper: AurHelper,
}

fn default_mountpoint() -> PathBuf {
    PathBuf::from(DEFAULT_MOUNTPOINT)
}

fn default_kernels() -> Vec<Kernel> {
    vec![Kernel::Linux]
}

fn default_dotfiles() -> Option<DotfilesConfig> {
    Some(DotfilesConfig::default())
}

fn default_true() -> bool {
    true
}

/// Target disk and the partitions to create on it, in on-disk order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    pub device: PathBuf,
    /// Zap existing partition tables first
    #[serde(default = "default_true")]
    pub wipe: bool,
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// `512M`, `+32G`, ...; absent takes the rest of the disk
    #[serde(default)]
    pub size: Option<String>,
    /// Absent leaves the partition unformatted (BIOS boot partition)
    #[serde(default)]
    pub filesystem: Option<Filesystem>,
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,
    #[serde(default)]
    pub label: Option<String>,
    /// GPT type code override
    #[serde(default)]
    pub type_code: Option<String>,
}

impl PartitionSpec {
    /// A FAT32 partition mounted at `/boot` or `/boot/efi`
    pub fn is_esp(&self) -> bool {
        self.filesystem == Some(Filesystem::Fat32)
            && self
                .mountpoint
                .as_deref()
                .is_some_and(|m| m == Path::new("/boot") || m == Path::new("/boot/efi"))
    }

    pub fn type_code(&self) -> String {
        if let Some(ref code) = self.type_code {
            return code.clone();
        }
        if self.is_esp() {
            return "ef00".to_string();
        }
        match self.filesystem {
            Some(fs) => fs.default_type_code().to_string(),
            None => "ef02".to_string(),
        }
    }
}

impl DiskLayout {
    pub fn root_partition(&self) -> Option<(usize, &PartitionSpec)> {
        self.partitions
            .iter()
            .enumerate()
            .find(|(_, p)| p.mountpoint.as_deref() == Some(Path::new("/")))
    }

    pub fn esp(&self) -> Option<&PartitionSpec> {
        self.partitions.iter().find(|p| p.is_esp())
    }

    /// Structural checks, plus firmware-specific boot partition rules.
    pub fn validate(&self, firmware: FirmwareMode) -> Result<()> {
        if !self.device.to_string_lossy().starts_with("/dev/") {
            return Err(ProvisionError::validation(format!(
                "Invalid disk path '{}': must start with /dev/",
                self.device.display()
            )));
        }
        if self.partitions.is_empty() {
            return Err(ProvisionError::validation("Disk layout has no partitions"));
        }

        let last = self.partitions.len() - 1;
        let mut seen: Vec<&Path> = Vec::new();
        for (i, part) in self.partitions.iter().enumerate() {
            if part.size.is_none() && i != last {
                return Err(ProvisionError::validation(format!(
                    "Partition {} has no size; only the last partition may fill the disk",
                    i + 1
                )));
            }
            match (part.filesystem, part.mountpoint.as_deref()) {
                (Some(Filesystem::Swap), Some(m)) => {
                    return Err(ProvisionError::validation(format!(
                        "Swap partition {} cannot have a mountpoint ({})",
                        i + 1,
                        m.display()
                    )));
                }
                (None, Some(m)) => {
                    return Err(ProvisionError::validation(format!(
                        "Unformatted partition {} cannot be mounted at {}",
                        i + 1,
                        m.display()
                    )));
                }
                (_, Some(m)) if !m.is_absolute() => {
                    return Err(ProvisionError::validation(format!(
                        "Mountpoint '{}' must be absolute",
                        m.display()
                    )));
                }
                (_, Some(m)) => {
                    if seen.contains(&m) {
                        return Err(ProvisionError::validation(format!(
                            "Mountpoint '{}' is used twice",
                            m.display()
                        )));
                    }
                    seen.push(m);
                }
                _ => {}
            }
        }

        if self.root_partition().is_none() {
            return Err(ProvisionError::validation("Disk layout has no partition mounted at /"));
        }
        if firmware.is_uefi() && self.esp().is_none() {
            return Err(ProvisionError::validation(
                "UEFI systems need a fat32 partition mounted at /boot or /boot/efi",
            ));
        }
        if firmware.is_bios() && !self.partitions.iter().any(|p| p.type_code() == "ef02") {
            return Err(ProvisionError::validation(
                "BIOS installs on GPT need an unformatted BIOS boot partition (type ef02)",
            ));
        }
        Ok(())
    }
}

/// LUKS2 encryption of selected mountpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_encrypted_mountpoints")]
    pub mountpoints: Vec<PathBuf>,
}

fn default_encrypted_mountpoints() -> Vec<PathBuf> {
    vec![PathBuf::from("/")]
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            mountpoints: default_encrypted_mountpoints(),
        }
    }
}

impl EncryptionConfig {
    pub fn covers(&self, mountpoint: &Path) -> bool {
        self.mountpoints.iter().any(|m| m == mountpoint)
    }

    /// Every encrypted mountpoint must be a formatted, non-boot partition.
    pub fn validate(&self, layout: &DiskLayout) -> Result<()> {
        if self.mountpoints.is_empty() {
            return Err(ProvisionError::validation("Encryption lists no mountpoints"));
        }
        for target in &self.mountpoints {
            let part = layout
                .partitions
                .iter()
                .find(|p| p.mountpoint.as_deref() == Some(target.as_path()))
                .ok_or_else(|| {
                    ProvisionError::validation(format!(
                        "Encrypted mountpoint '{}' is not in the disk layout",
                        target.display()
                    ))
                })?;
            if part.is_esp() || target.starts_with("/boot") {
                return Err(ProvisionError::validation(format!(
                    "'{}' must stay unencrypted so the bootloader can read it",
                    target.display()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub mode: NetworkMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub extra_packages: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Grant the wheel group sudo through a sudoers drop-in
    #[serde(default = "default_true")]
    pub sudo: bool,
}

fn default_groups() -> Vec<String> {
    vec!["wheel".to_string()]
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

impl UserConfig {
    pub fn home(&self) -> PathBuf {
        PathBuf::from("/home").join(&self.username)
    }
}

/// Bootloader theme settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_theme_repo")]
    pub repo_url: String,
    #[serde(default = "default_theme_name")]
    pub name: String,
    /// In-target directory searched for the installed descriptor
    #[serde(default = "default_theme_dir")]
    pub theme_dir: PathBuf,
    #[serde(default = "default_theme_descriptor")]
    pub descriptor: String,
}

fn default_theme_repo() -> String {
    DEFAULT_THEME_REPO.to_string()
}

fn default_theme_name() -> String {
    DEFAULT_THEME_NAME.to_string()
}

fn default_theme_dir() -> PathBuf {
    PathBuf::from(DEFAULT_THEME_DIR)
}

fn default_theme_descriptor() -> String {
    DEFAULT_THEME_DESCRIPTOR.to_string()
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_url: default_theme_repo(),
            name: default_theme_name(),
            theme_dir: default_theme_dir(),
            descriptor: default_theme_descriptor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotfilesConfig {
    #[serde(default = "default_dotfiles_repo")]
    pub repo_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_true")]
    pub install_fonts: bool,
}

fn default_dotfiles_repo() -> String {
    DEFAULT_DOTFILES_REPO.to_string()
}

impl Default for DotfilesConfig {
    fn default() -> Self {
        Self {
            repo_url: default_dotfiles_repo(),
            branch: None,
            install_fonts: true,
        }
    }
}

impl ProvisioningConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Identity, URL and layout checks. Firmware-specific layout rules use
    /// `firmware` (the override or the detected mode).
    pub fn validate(&self, firmware: FirmwareMode) -> Result<()> {
        validate_hostname(&self.hostname)?;
        validate_username(&self.user.username)?;

        if !self.mountpoint.is_absolute() {
            return Err(ProvisionError::validation(format!(
                "Mountpoint '{}' must be an absolute path",
                self.mountpoint.display()
            )));
        }
        if self.kernels.is_empty() {
            return Err(ProvisionError::validation("At least one kernel must be selected"));
        }

        if self.theme.enabled {
            validate_repo_url("theme", &self.theme.repo_url)?;
            if self.theme.name.trim().is_empty() {
                return Err(ProvisionError::validation("Theme name must not be empty"));
            }
            if !self.theme.theme_dir.is_absolute() {
                return Err(ProvisionError::validation("Theme directory must be absolute"));
            }
        }
        if let Some(ref dotfiles) = self.dotfiles {
            validate_repo_url("dotfiles", &dotfiles.repo_url)?;
        }

        self.disk_layout.validate(firmware)?;
        if let Some(ref encryption) = self.encryption {
            encryption.validate(&self.disk_layout)?;
        }
        Ok(())
    }
}

/// RFC 1123 label: letters, digits and hyphens, 1-63 chars, no leading or
/// trailing hyphen.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    if hostname.is_empty() {
        return Err(ProvisionError::validation("Hostname must be specified"));
    }
    if hostname.len() > 63 {
        return Err(ProvisionError::validation("Hostname must be at most 63 characters long"));
    }
    if hostname.starts_with('-') || hostname.ends_with('-') {
        return Err(ProvisionError::validation("Hostname cannot start or end with a hyphen"));
    }
    if !hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ProvisionError::validation(
            "Hostname can only contain letters, numbers, and hyphens",
        ));
    }
    Ok(())
}

/// `useradd` rules: start with a lowercase letter or underscore, then
/// lowercase letters, digits, `_` or `-`, at most 32 characters.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(ProvisionError::validation("Username must be specified"));
    }
    if username.len() > 32 {
        return Err(ProvisionError::validation("Username must be at most 32 characters long"));
    }
    if username == "root" {
        return Err(ProvisionError::validation("The primary user cannot be root"));
    }
    let mut chars = username.chars();
    if let Some(first) = chars.next() {
        if !(first.is_ascii_lowercase() || first == '_') {
            return Err(ProvisionError::validation(
                "Username must start with a lowercase letter or underscore",
            ));
        }
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(ProvisionError::validation(
            "Username can only contain lowercase letters, numbers, '_' and '-'",
        ));
    }
    Ok(())
}

fn validate_repo_url(what: &str, url: &str) -> Result<()> {
    let url = url.trim();
    let ok = ["http://", "https://", "git://", "ssh://"]
        .iter()
        .any(|scheme| url.starts_with(scheme));
    if ok {
        Ok(())
    } else {
        Err(ProvisionError::validation(format!(
            "{} repository URL must start with http://, https://, git://, or ssh://",
            what
        )))
    }
}

// ============================================================================
// Credentials payload
// ============================================================================

/// Secrets keyed by name. `Debug` never prints values.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    entries: BTreeMap<String, String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.keys().map(|k| (k, "[redacted]")))
            .finish()
    }
}

impl Credentials {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials from {:?}", path.as_ref()))?;
        let creds: Self =
            serde_json::from_str(&content).context("Failed to parse credentials JSON")?;
        Ok(creds)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// A non-empty secret, or `MissingCredential`
    pub fn get(&self, key: &str) -> Result<&str> {
        match self.entries.get(key) {
            Some(value) if !value.is_empty() => Ok(value.as_str()),
            _ => Err(ProvisionError::MissingCredential(key.to_string())),
        }
    }

    /// Fails on the first secret `config` needs that is absent.
    pub fn require_for(&self, config: &ProvisioningConfig) -> Result<()> {
        self.get(ROOT_PASSWORD)?;
        self.get(USER_PASSWORD)?;
        if config.encryption.is_some() {
            self.get(ENCRYPTION_PASSWORD)?;
        }
        Ok(())
    }
}
